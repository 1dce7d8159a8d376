// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::key::DevelopDirKey;
use crate::{Error, Result};

/// Caller-supplied override for the whole assignment algorithm: handed
/// each key and its recipe-computed `base_dir`, returns the final
/// workspace directory. When set, the oracle never touches the embedded
/// database -- it only memoizes the result for the lifetime of this value.
pub trait ExternalDirPersister: Send + Sync {
    fn assign(&self, key: &DevelopDirKey, base_dir: &str) -> String;
}

enum Backend {
    Sqlite { conn: Connection },
    External { persister: Arc<dyn ExternalDirPersister>, known: Mutex<HashMap<Vec<u8>, String>> },
}

/// Assigns stable, collision-free develop-mode workspace directories to
/// `(recipe, variant-id)` keys, backed by `.bob-dev-dirs.sqlite3`
/// (`spec.md §4.7`). Unlike release mode's by-variant-id persister,
/// identical steps of *different* recipes never share a directory; recipe
/// edits preserve a key's prior directory as long as its base path still
/// matches the (possibly changed) recipe name.
pub struct DevelopDirOracle {
    backend: Backend,
}

impl DevelopDirOracle {
    /// Open (creating if absent) the embedded database at
    /// `.bob-dev-dirs.sqlite3` under `project_root`.
    pub fn open(project_root: &Path) -> Result<Self> {
        let conn = Connection::open(project_root.join(".bob-dev-dirs.sqlite3"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta(key TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE IF NOT EXISTS dirs(key BLOB PRIMARY KEY, dir TEXT NOT NULL);",
        )?;
        Ok(Self { backend: Backend::Sqlite { conn } })
    }

    /// Use an external directory assignment instead of the embedded
    /// database.
    pub fn with_external_persister(persister: Arc<dyn ExternalDirPersister>) -> Self {
        Self { backend: Backend::External { persister, known: Mutex::new(HashMap::new()) } }
    }

    /// Run once per invocation, before any directory is looked up.
    /// `entries` must cover every step's key and recipe-computed
    /// `base_dir`, in package-graph traversal order (a package's
    /// dependencies before the package itself); a key repeated more than
    /// once only keeps the `base_dir` of its first occurrence. A no-op,
    /// beyond the external persister's own memoization, when `cache_key`
    /// matches the database's stored version.
    pub fn refresh(
        &mut self,
        cache_key: &str,
        entries: impl IntoIterator<Item = (DevelopDirKey, String)>,
    ) -> Result<()> {
        match &mut self.backend {
            Backend::External { persister, known } => {
                let mut known = known.lock().unwrap();
                let mut visited = HashSet::new();
                for (key, base_dir) in entries {
                    let blob = key.blob();
                    if !visited.insert(blob.clone()) {
                        continue;
                    }
                    known.insert(blob, persister.assign(&key, &base_dir));
                }
                Ok(())
            }
            Backend::Sqlite { conn } => {
                let stored: Option<String> = conn
                    .query_row("SELECT value FROM meta WHERE key = 'vsn'", [], |row| row.get(0))
                    .optional()?;
                if stored.as_deref() == Some(cache_key) {
                    return Ok(());
                }
                tracing::info!(cache_key, "recipe set changed, refreshing develop directories");
                refresh_database(conn, cache_key, entries)
            }
        }
    }

    /// The directory assigned to `key`. Only meaningful after `refresh`.
    pub fn dir(&self, key: &DevelopDirKey) -> Result<String> {
        match &self.backend {
            Backend::External { known, .. } => known
                .lock()
                .unwrap()
                .get(&key.blob())
                .cloned()
                .ok_or_else(|| Error::Missing(key.to_string())),
            Backend::Sqlite { conn } => conn
                .query_row("SELECT dir FROM dirs WHERE key = ?1", params![key.blob()], |row| row.get(0))
                .optional()?
                .ok_or_else(|| Error::Missing(key.to_string())),
        }
    }
}

/// Pass A/B of the refresh protocol: Pass A looks up every key's existing
/// row and keeps it if its stored path still starts with the key's current
/// `base_dir`, otherwise queues the key for (re-)numbering. Pass B clears
/// `dirs` and reinserts the kept rows plus freshly numbered ones -- one
/// counter per `base_dir`, skipping any suffix a kept row already claims.
fn refresh_database(
    conn: &mut Connection,
    cache_key: &str,
    entries: impl IntoIterator<Item = (DevelopDirKey, String)>,
) -> Result<()> {
    let mut visited = HashSet::new();
    let mut kept: Vec<(Vec<u8>, String)> = Vec::new();
    let mut queued: HashMap<String, Vec<Vec<u8>>> = HashMap::new();

    {
        let mut lookup = conn.prepare("SELECT dir FROM dirs WHERE key = ?1")?;
        for (key, base_dir) in entries {
            let blob = key.blob();
            if !visited.insert(blob.clone()) {
                continue;
            }
            let existing: Option<String> = lookup.query_row(params![blob], |row| row.get(0)).optional()?;
            match existing {
                Some(dir) if dir.starts_with(&base_dir) => kept.push((blob, dir)),
                _ => queued.entry(base_dir).or_default().push(blob),
            }
        }
    }

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM dirs", [])?;

    let mut known_dirs: HashSet<String> = kept.iter().map(|(_, dir)| dir.clone()).collect();
    for (blob, dir) in &kept {
        tx.execute("INSERT INTO dirs (key, dir) VALUES (?1, ?2)", params![blob, dir])?;
    }
    for (base_dir, keys) in queued {
        let mut num = 1u32;
        for blob in keys {
            let dir = loop {
                let candidate = format!("{base_dir}/{num}");
                num += 1;
                if known_dirs.contains(&candidate) {
                    continue;
                }
                break candidate;
            };
            tx.execute("INSERT INTO dirs (key, dir) VALUES (?1, ?2)", params![blob, dir])?;
            known_dirs.insert(dir);
        }
    }

    tx.execute("INSERT OR REPLACE INTO meta (key, value) VALUES ('vsn', ?1)", params![cache_key])?;
    tx.commit()?;
    Ok(())
}
