// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use super::*;

fn key(recipe: &str) -> DevelopDirKey {
    DevelopDirKey::new(recipe, bob_digest::NULL_DIGEST)
}

#[test]
fn assigns_sequential_suffixes_under_shared_base_dir() {
    let tmp = TempDir::new().unwrap();
    let mut oracle = DevelopDirOracle::open(tmp.path()).unwrap();

    oracle
        .refresh(
            "v1",
            vec![(key("a"), "dev/pkg".to_string()), (key("b"), "dev/pkg".to_string())],
        )
        .unwrap();

    let dir_a = oracle.dir(&key("a")).unwrap();
    let dir_b = oracle.dir(&key("b")).unwrap();
    assert_ne!(dir_a, dir_b);
    assert!(dir_a.starts_with("dev/pkg/"));
    assert!(dir_b.starts_with("dev/pkg/"));
}

#[test]
fn distinct_recipes_never_share_a_directory() {
    let tmp = TempDir::new().unwrap();
    let mut oracle = DevelopDirOracle::open(tmp.path()).unwrap();

    // Same variant-id, different recipe name: must still land in
    // different base directories (the caller computes distinct base_dirs
    // per recipe, and the key itself also differs).
    oracle
        .refresh(
            "v1",
            vec![(key("foo"), "dev/foo".to_string()), (key("bar"), "dev/bar".to_string())],
        )
        .unwrap();

    assert!(oracle.dir(&key("foo")).unwrap().starts_with("dev/foo/"));
    assert!(oracle.dir(&key("bar")).unwrap().starts_with("dev/bar/"));
}

#[test]
fn repeated_key_keeps_first_base_dir() {
    let tmp = TempDir::new().unwrap();
    let mut oracle = DevelopDirOracle::open(tmp.path()).unwrap();

    oracle
        .refresh(
            "v1",
            vec![(key("a"), "dev/first".to_string()), (key("a"), "dev/second".to_string())],
        )
        .unwrap();

    assert!(oracle.dir(&key("a")).unwrap().starts_with("dev/first/"));
}

#[test]
fn same_cache_key_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let mut oracle = DevelopDirOracle::open(tmp.path()).unwrap();

    oracle.refresh("v1", vec![(key("a"), "dev/pkg".to_string())]).unwrap();
    let first = oracle.dir(&key("a")).unwrap();

    // Second refresh under the same cache key omits "a" entirely; since
    // the stored version still matches, the database is left untouched.
    oracle.refresh("v1", Vec::new()).unwrap();
    assert_eq!(oracle.dir(&key("a")).unwrap(), first);
}

#[test]
fn matching_base_dir_survives_cache_key_change() {
    let tmp = TempDir::new().unwrap();
    let mut oracle = DevelopDirOracle::open(tmp.path()).unwrap();

    oracle.refresh("v1", vec![(key("a"), "dev/pkg".to_string())]).unwrap();
    let first = oracle.dir(&key("a")).unwrap();

    // Recipe set changed but "a"'s own base directory is unchanged: its
    // prior assignment is kept verbatim, not renumbered.
    oracle.refresh("v2", vec![(key("a"), "dev/pkg".to_string())]).unwrap();
    assert_eq!(oracle.dir(&key("a")).unwrap(), first);
}

#[test]
fn changed_base_dir_gets_renumbered_from_one() {
    let tmp = TempDir::new().unwrap();
    let mut oracle = DevelopDirOracle::open(tmp.path()).unwrap();

    oracle.refresh("v1", vec![(key("a"), "dev/old".to_string())]).unwrap();

    // The recipe was renamed: "a"'s base directory changes, so its old
    // path no longer matches and it is queued for fresh numbering.
    oracle.refresh("v2", vec![(key("a"), "dev/new".to_string())]).unwrap();
    assert_eq!(oracle.dir(&key("a")).unwrap(), "dev/new/1");
}

struct CountingPersister {
    calls: Mutex<u32>,
}

impl ExternalDirPersister for CountingPersister {
    fn assign(&self, key: &DevelopDirKey, base_dir: &str) -> String {
        *self.calls.lock().unwrap() += 1;
        format!("{base_dir}/{}", key.recipe_name)
    }
}

#[test]
fn external_persister_never_touches_the_database() {
    let tmp = TempDir::new().unwrap();
    let persister = Arc::new(CountingPersister { calls: Mutex::new(0) });
    let mut oracle = DevelopDirOracle::with_external_persister(persister.clone());

    oracle.refresh("v1", vec![(key("a"), "dev/pkg".to_string())]).unwrap();

    assert_eq!(oracle.dir(&key("a")).unwrap(), "dev/pkg/a");
    assert_eq!(*persister.calls.lock().unwrap(), 1);
    assert!(!tmp.path().join(".bob-dev-dirs.sqlite3").exists());
}

#[test]
fn missing_key_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let mut oracle = DevelopDirOracle::open(tmp.path()).unwrap();
    oracle.refresh("v1", Vec::new()).unwrap();

    let err = oracle.dir(&key("nope")).unwrap_err();
    assert!(matches!(err, Error::Missing(_)));
}
