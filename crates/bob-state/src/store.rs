// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use bob_digest::Digest;
use relative_path::RelativePathBuf;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};

use crate::model::{BuildState, DirectoryState, InputHashes, ResultHash};
use crate::{Error, Result};

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn key_for(prefix: &str, path: &str) -> Vec<u8> {
    let mut key = prefix.as_bytes().to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

/// A single-process, single-writer embedded key-value store holding the
/// per-workspace and global persistent state described in `spec.md §3`.
///
/// Every mutator commits (`flush`) before returning, so a crash at any
/// point leaves the durable store consistent with whatever was last
/// written -- no explicit recovery step is required on open.
pub struct StateStore {
    db: sled::Db,
}

impl StateStore {
    /// Open (creating if absent) the state store at `.bob-state.*` under
    /// `project_root`.
    pub fn open(project_root: &Path) -> Result<Self> {
        let db = sled::open(project_root.join(".bob-state.sled"))?;
        Ok(Self { db })
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.db.insert(key, encode(value)?)?;
        self.db.flush()?;
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }

    // -- per-workspace record ------------------------------------------------

    pub fn variant_id(&self, path: &str) -> Result<Option<Digest>> {
        self.get(&key_for("variant/", path))
    }

    pub fn set_variant_id(&self, path: &str, id: Digest) -> Result<()> {
        self.set(&key_for("variant/", path), &id)
    }

    pub fn del_variant_id(&self, path: &str) -> Result<()> {
        self.del(&key_for("variant/", path))
    }

    pub fn directory_state(&self, path: &str) -> Result<Option<DirectoryState>> {
        self.get(&key_for("dirstate/", path))
    }

    pub fn set_directory_state(&self, path: &str, state: &DirectoryState) -> Result<()> {
        self.set(&key_for("dirstate/", path), state)
    }

    pub fn del_directory_state(&self, path: &str) -> Result<()> {
        self.del(&key_for("dirstate/", path))
    }

    pub fn input_hashes(&self, path: &str) -> Result<Option<InputHashes>> {
        self.get(&key_for("inputs/", path))
    }

    pub fn set_input_hashes(&self, path: &str, hashes: &InputHashes) -> Result<()> {
        self.set(&key_for("inputs/", path), hashes)
    }

    pub fn del_input_hashes(&self, path: &str) -> Result<()> {
        self.del(&key_for("inputs/", path))
    }

    pub fn result_hash(&self, path: &str) -> Result<Option<ResultHash>> {
        self.get(&key_for("result/", path))
    }

    pub fn set_result_hash(&self, path: &str, hash: ResultHash) -> Result<()> {
        self.set(&key_for("result/", path), &hash)
    }

    pub fn del_result_hash(&self, path: &str) -> Result<()> {
        self.del(&key_for("result/", path))
    }

    /// Atomically clear `result_hash` and `input_hashes` and store a fresh
    /// `directory_state`, as required before a step can be considered for a
    /// rerun (`spec.md §3` invariant 4: before running a step, input hashes
    /// are cleared and the result hash is set to an in-progress sentinel).
    pub fn reset_workspace_state(&self, path: &str, state: DirectoryState) -> Result<()> {
        let result_key = key_for("result/", path);
        let inputs_key = key_for("inputs/", path);
        let dirstate_key = key_for("dirstate/", path);
        let state_bytes = encode(&state)?;

        self.db
            .transaction(|tx| {
                tx.remove(result_key.as_slice())?;
                tx.remove(inputs_key.as_slice())?;
                tx.insert(dirstate_key.as_slice(), state_bytes.as_slice())?;
                Ok::<_, ConflictableTransactionError<Error>>(())
            })
            .map_err(tx_err)?;
        self.db.flush()?;
        Ok(())
    }

    // -- global maps ----------------------------------------------------------

    pub fn build_id(&self, key: &[u8]) -> Result<Option<Digest>> {
        self.get(&key_for("buildid/", &hex::encode(key)))
    }

    pub fn set_build_id(&self, key: &[u8], id: Digest) -> Result<()> {
        self.set(&key_for("buildid/", &hex::encode(key)), &id)
    }

    pub fn del_build_id(&self, key: &[u8]) -> Result<()> {
        self.del(&key_for("buildid/", &hex::encode(key)))
    }

    pub fn build_state(&self) -> Result<Option<BuildState>> {
        self.get(b"buildstate")
    }

    pub fn set_build_state(&self, state: &BuildState) -> Result<()> {
        self.set(b"buildstate", state)
    }

    /// All `(pretty_name, variant_id_hex) -> directory` entries, for the
    /// external clean subcommand.
    pub fn all_name_directories(&self) -> Result<Vec<(String, String, RelativePathBuf)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(b"namedir/") {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key[b"namedir/".len()..]).into_owned();
            let Some((name, vid_hex)) = key.split_once('\0') else {
                continue;
            };
            let dir: RelativePathBuf = decode(&value)?;
            out.push((name.to_string(), vid_hex.to_string(), dir));
        }
        Ok(out)
    }

    /// Assign (or return the existing) release-mode directory for
    /// `(pretty_name, variant_id_hex)`, appending a collision-avoiding
    /// numeric suffix on first assignment.
    pub fn get_by_name_directory(
        &self,
        name: &str,
        variant_id_hex: &str,
        is_checkout: bool,
    ) -> Result<RelativePathBuf> {
        let entry_key = format!("namedir/{name}\0{variant_id_hex}");
        if let Some(existing) = self.get::<RelativePathBuf>(entry_key.as_bytes())? {
            return Ok(existing);
        }

        let counter_key = format!("namedir_counter/{}{name}", if is_checkout { "src/" } else { "" });
        let next = self
            .db
            .update_and_fetch(counter_key.as_bytes(), |old| {
                let n: u64 = old
                    .and_then(|b| b.try_into().ok())
                    .map(u64::from_be_bytes)
                    .unwrap_or(0)
                    + 1;
                Some(n.to_be_bytes().to_vec())
            })?
            .map(|b| u64::from_be_bytes(b.as_ref().try_into().expect("8 bytes")))
            .unwrap_or(1);

        let category = if is_checkout { "src" } else { "dist" };
        let dir = RelativePathBuf::from(format!("{category}/{name}/{next}"));
        self.set(entry_key.as_bytes(), &dir)?;
        Ok(dir)
    }
}

fn tx_err(err: TransactionError<Error>) -> Error {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Sled(e),
    }
}
