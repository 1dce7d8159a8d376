// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use bob_error::{BuildError, Error, Result};

fn build_err(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::Build(BuildError::new(format!(
        "failed to {action} '{}': {err}",
        path.display()
    )))
}

/// Ensure `path` exists, creating it (and its parents) if necessary.
/// Reports whether this call created it.
pub fn construct_dir(path: &Path) -> Result<(PathBuf, bool)> {
    if path.exists() {
        return Ok((path.to_path_buf(), false));
    }
    std::fs::create_dir_all(path).map_err(|err| build_err("create directory", path, err))?;
    Ok((path.to_path_buf(), true))
}

/// Remove a file or directory tree. A permission error partway through a
/// directory tree is reported as a [`BuildError`] rather than panicking, so
/// the caller can surface it to the user instead of aborting the process.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(build_err("remove", path, err)),
    };

    if meta.is_dir() {
        std::fs::remove_dir_all(path).map_err(|err| build_err("remove", path, err))
    } else {
        std::fs::remove_file(path).map_err(|err| build_err("remove", path, err))
    }
}

/// Remove every entry inside `path` but keep the directory itself.
pub fn empty_directory(path: &Path) -> Result<()> {
    let entries = std::fs::read_dir(path).map_err(|err| build_err("read", path, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| build_err("read", path, err))?;
        remove_path(&entry.path())?;
    }
    Ok(())
}
