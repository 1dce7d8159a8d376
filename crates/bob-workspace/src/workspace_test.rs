// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use bob_digest::Digest;
use bob_error::Error;
use bob_step::{Dependencies, Step, StepKind, VariantDigest};
use relative_path::RelativePathBuf;
use rstest::rstest;
use tempfile::TempDir;

use super::*;

struct Zero;
impl VariantDigest for Zero {
    fn compute(&self, _resolve: &dyn Fn(&Step) -> Digest) -> Digest {
        bob_digest::NULL_DIGEST
    }
}

fn dep_step(name: &str, _workspace: &std::path::Path) -> Arc<Step> {
    Arc::new(Step {
        kind: StepKind::Build,
        variant_id: bob_digest::NULL_DIGEST,
        workspace_path: RelativePathBuf::from(name),
        exec_path: RelativePathBuf::from(name),
        deps: Dependencies::default(),
        env: BTreeMap::new(),
        script: String::new(),
        is_deterministic: true,
        is_relocatable: true,
        has_net_access: false,
        sandbox_mounts: Vec::new(),
        scm_list: Vec::new(),
        package_name: name.to_string(),
        package_stack: Vec::new(),
        digest: Arc::new(Zero),
    })
}

#[rstest]
fn construct_dir_reports_creation_once() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("build").join("app");

    let (p1, created1) = construct_dir(&path).unwrap();
    assert!(created1);
    assert_eq!(p1, path);

    let (_p2, created2) = construct_dir(&path).unwrap();
    assert!(!created2);
}

#[rstest]
fn empty_directory_keeps_dir_but_clears_contents() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("sub")).unwrap();
    std::fs::write(tmp.path().join("file"), b"data").unwrap();

    empty_directory(tmp.path()).unwrap();

    assert!(tmp.path().exists());
    assert!(!tmp.path().join("sub").exists());
    assert!(!tmp.path().join("file").exists());
}

#[cfg(unix)]
#[rstest]
fn remove_path_fails_on_read_only_child_without_partial_delete() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("dir");
    std::fs::create_dir(&dir).unwrap();
    std::fs::write(dir.join("file"), b"data").unwrap();

    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o500)).unwrap();
    let result = remove_path(tmp.path());
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();

    assert!(matches!(result, Err(Error::Build(_))));
    assert!(dir.join("file").exists(), "a read-only child must not be partially deleted");
}

#[cfg(unix)]
#[rstest]
fn empty_directory_fails_on_read_only_child_without_partial_delete() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("dir");
    std::fs::create_dir(&dir).unwrap();
    std::fs::write(dir.join("file"), b"data").unwrap();

    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o500)).unwrap();
    let result = empty_directory(tmp.path());
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();

    assert!(matches!(result, Err(Error::Build(_))));
    assert!(tmp.path().exists());
    assert!(dir.join("file").exists(), "a read-only child must not be partially deleted");
}

#[rstest]
fn atticize_moves_path_under_timestamped_name() {
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("src").join("app");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("marker"), b"x").unwrap();

    let attic_root = tmp.path().join("attic");
    let dest = atticize(&target, &attic_root).unwrap();

    assert!(!target.exists());
    assert!(dest.exists());
    assert!(dest.join("marker").exists());
    assert!(dest.file_name().unwrap().to_str().unwrap().ends_with("_app"));
}

#[rstest]
fn hash_workspace_is_stable_and_sensitive_to_content() {
    let tmp = TempDir::new().unwrap();
    let workspace = tmp.path().join("build").join("app");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("a.txt"), b"hello").unwrap();

    let first = hash_workspace(&workspace).unwrap();
    let second = hash_workspace(&workspace).unwrap();
    assert_eq!(first, second, "hashing twice without changes must be stable");

    std::fs::write(workspace.join("a.txt"), b"world").unwrap();
    let third = hash_workspace(&workspace).unwrap();
    assert_ne!(first, third, "changed content must change the hash");

    assert!(workspace.parent().unwrap().join("cache.bin").exists());
}

#[rstest]
fn hash_workspace_is_sensitive_to_layout() {
    let tmp = TempDir::new().unwrap();
    let a = tmp.path().join("build").join("a");
    std::fs::create_dir_all(&a).unwrap();
    std::fs::write(a.join("same"), b"data").unwrap();

    let b = tmp.path().join("build").join("b");
    std::fs::create_dir_all(b.join("sub")).unwrap();
    std::fs::write(b.join("sub").join("same"), b"data").unwrap();

    assert_ne!(hash_workspace(&a).unwrap(), hash_workspace(&b).unwrap());
}

#[cfg(unix)]
#[rstest]
fn link_dependencies_creates_expected_symlinks() {
    let tmp = TempDir::new().unwrap();
    let sandbox_ws = tmp.path().join("build").join("sandbox");
    let tool_ws = tmp.path().join("build").join("tool");
    let arg_ws = tmp.path().join("build").join("arg");
    for p in [&sandbox_ws, &tool_ws, &arg_ws] {
        std::fs::create_dir_all(p).unwrap();
    }

    let sandbox = dep_step("sandboxpkg", &sandbox_ws);
    let tool = dep_step("toolpkg", &tool_ws);
    let arg = dep_step("argpkg", &arg_ws);

    let mut tools = BTreeMap::new();
    tools.insert("mytool".to_string(), Arc::clone(&tool));

    let step = Step {
        kind: StepKind::Build,
        variant_id: bob_digest::NULL_DIGEST,
        workspace_path: RelativePathBuf::from("build/main"),
        exec_path: RelativePathBuf::from("build/main"),
        deps: Dependencies {
            arguments: vec![Arc::clone(&arg)],
            tools,
            sandbox: Some(Arc::clone(&sandbox)),
        },
        env: BTreeMap::new(),
        script: String::new(),
        is_deterministic: true,
        is_relocatable: true,
        has_net_access: false,
        sandbox_mounts: Vec::new(),
        scm_list: Vec::new(),
        package_name: "main".to_string(),
        package_stack: Vec::new(),
        digest: Arc::new(Zero),
    };

    let deps_dir = tmp.path().join("build").join("deps");
    let resolve = |s: &Step| match s.package_name.as_str() {
        "sandboxpkg" => sandbox_ws.clone(),
        "toolpkg" => tool_ws.clone(),
        "argpkg" => arg_ws.clone(),
        other => panic!("unexpected dependency {other}"),
    };

    link_dependencies(&step, &deps_dir, resolve).unwrap();

    assert_eq!(std::fs::canonicalize(deps_dir.join("sandbox")).unwrap(), std::fs::canonicalize(&sandbox_ws).unwrap());
    assert_eq!(
        std::fs::canonicalize(deps_dir.join("tools").join("mytool")).unwrap(),
        std::fs::canonicalize(&tool_ws).unwrap()
    );
    assert_eq!(
        std::fs::canonicalize(deps_dir.join("args").join("01-argpkg")).unwrap(),
        std::fs::canonicalize(&arg_ws).unwrap()
    );

    // idempotent: calling again rebuilds cleanly
    link_dependencies(&step, &deps_dir, resolve).unwrap();
    assert!(deps_dir.join("sandbox").exists());
}
