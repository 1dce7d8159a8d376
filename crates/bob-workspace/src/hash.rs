// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;

use bob_digest::{Digest, Hasher};
use bob_error::{BuildError, Error, Result};
use relative_path::RelativePathBuf;
use serde::{Deserialize, Serialize};

/// A memoized per-file digest, invalidated whenever the file's mtime or
/// size no longer matches what was recorded -- avoids re-reading unchanged
/// files in a large workspace on every build.
#[derive(Clone, Serialize, Deserialize)]
struct CacheEntry {
    mtime_secs: i64,
    mtime_nanos: u32,
    size: u64,
    digest: Digest,
}

type Memo = HashMap<RelativePathBuf, CacheEntry>;

fn io_err(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::Build(BuildError::new(format!(
        "failed to {action} '{}': {err}",
        path.display()
    )))
}

/// Hash the content of a workspace directory tree, using a sibling
/// `cache.bin` file next to it as a per-file memo.
pub fn hash_workspace(workspace: &Path) -> Result<Digest> {
    let cache_path = workspace.parent().map(|parent| parent.join("cache.bin"));
    let mut memo = match &cache_path {
        Some(path) => load_memo(path),
        None => Memo::default(),
    };

    let digest = hash_dir(workspace, workspace, &mut memo)?;

    if let Some(cache_path) = &cache_path {
        save_memo(cache_path, &memo)?;
    }

    Ok(digest)
}

fn load_memo(path: &Path) -> Memo {
    match std::fs::read(path) {
        Ok(bytes) => bincode::deserialize(&bytes).unwrap_or_else(|err| {
            tracing::warn!(%err, path = %path.display(), "ignoring unreadable hash cache");
            Memo::default()
        }),
        Err(_) => Memo::default(),
    }
}

fn save_memo(path: &Path, memo: &Memo) -> Result<()> {
    let bytes = bincode::serialize(memo)
        .map_err(|err| Error::Build(BuildError::new(format!("failed to encode hash cache: {err}"))))?;
    std::fs::write(path, bytes).map_err(|err| io_err("write", path, err))
}

fn hash_dir(root: &Path, dir: &Path, memo: &mut Memo) -> Result<Digest> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(|err| io_err("read directory", dir, err))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| io_err("read directory", dir, err))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut hasher = Hasher::default();
    for entry in entries {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| io_err("stat", &path, err))?;

        let _ = hasher.write_all(entry.file_name().to_string_lossy().as_bytes());
        let _ = hasher.write_all(b"\0");

        if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|err| io_err("read link", &path, err))?;
            let _ = hasher.write_all(b"L");
            let _ = hasher.write_all(target.to_string_lossy().as_bytes());
        } else if file_type.is_dir() {
            let _ = hasher.write_all(b"D");
            let sub = hash_dir(root, &path, memo)?;
            let _ = hasher.write_all(sub.as_bytes());
        } else {
            let _ = hasher.write_all(b"F");
            let digest = hash_file_memoized(root, &path, memo)?;
            let _ = hasher.write_all(digest.as_bytes());
        }
    }
    Ok(hasher.digest())
}

fn hash_file_memoized(root: &Path, path: &Path, memo: &mut Memo) -> Result<Digest> {
    let meta = std::fs::metadata(path).map_err(|err| io_err("stat", path, err))?;
    let modified = meta.modified().map_err(|err| io_err("stat", path, err))?;
    let since_epoch = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();

    let rel = path
        .strip_prefix(root)
        .ok()
        .and_then(|rel| RelativePathBuf::from_path(rel).ok())
        .unwrap_or_else(|| RelativePathBuf::from(path.to_string_lossy().into_owned()));

    if let Some(cached) = memo.get(&rel) {
        if cached.mtime_secs == since_epoch.as_secs() as i64
            && cached.mtime_nanos == since_epoch.subsec_nanos()
            && cached.size == meta.len()
        {
            return Ok(cached.digest);
        }
    }

    let mut hasher = Hasher::default();
    let mut file = std::fs::File::open(path).map_err(|err| io_err("open", path, err))?;
    std::io::copy(&mut file, &mut hasher).map_err(|err| io_err("read", path, err))?;
    let digest = hasher.digest();

    memo.insert(
        rel,
        CacheEntry {
            mtime_secs: since_epoch.as_secs() as i64,
            mtime_nanos: since_epoch.subsec_nanos(),
            size: meta.len(),
            digest,
        },
    );

    Ok(digest)
}
