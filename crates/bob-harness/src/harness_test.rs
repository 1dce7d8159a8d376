// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bob_digest::Digest;
use bob_step::{Dependencies, SandboxMount, Step, StepKind, VariantDigest};
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

fn build_step(script: &str, arguments: Vec<Arc<Step>>) -> Step {
    Step {
        kind: StepKind::Build,
        variant_id: bob_digest::NULL_DIGEST,
        workspace_path: RelativePathBuf::from("build/app/workspace"),
        exec_path: RelativePathBuf::from("build/app/workspace"),
        deps: Dependencies {
            arguments,
            tools: BTreeMap::new(),
            sandbox: None,
        },
        env: BTreeMap::from([("RECIPE_VAR".to_string(), "1".to_string())]),
        script: script.to_string(),
        is_deterministic: true,
        is_relocatable: true,
        has_net_access: false,
        sandbox_mounts: Vec::new(),
        scm_list: Vec::new(),
        package_name: "app".to_string(),
        package_stack: Vec::new(),
        digest: Arc::new(Zero),
    }
}

#[rstest]
fn compose_scripts_embeds_clean_flag_and_body() {
    let step = build_step("echo building", Vec::new());
    let req = RunRequest {
        step: &step,
        extra_paths: &[],
        library_paths: &[],
        clean_workspace: true,
        sandbox: None,
        env_whitelist: &["PATH".to_string()],
        preserve_env: false,
    };

    let composed = compose_scripts(&req).unwrap();
    assert!(composed.wrapper.contains("_clean=1"));
    assert!(composed.wrapper.contains("#!/bin/bash"));
    assert!(composed.prolog_and_body.contains("bob_handle_error"));
    assert!(composed.prolog_and_body.contains("BOB_ALL_PATHS"));
    assert!(composed.prolog_and_body.contains("echo building"));
    assert_eq!(composed.step_env.get("BOB_CWD").unwrap(), "build/app/workspace");
}

#[rstest]
fn compose_scripts_lists_arguments_in_run_script_args() {
    let arg = Arc::new(build_step("", Vec::new()));
    let step = build_step("true", vec![arg]);
    let req = RunRequest {
        step: &step,
        extra_paths: &[],
        library_paths: &[],
        clean_workspace: false,
        sandbox: None,
        env_whitelist: &[],
        preserve_env: false,
    };

    let composed = compose_scripts(&req).unwrap();
    assert!(composed.wrapper.contains("run /bin/bash $trace -- ../script build/app/workspace"));
}

#[rstest]
fn compose_scripts_emits_sandbox_mounts() {
    let tmp = TempDir::new().unwrap();
    let root_fs = tmp.path().join("sandbox_root");
    std::fs::create_dir_all(root_fs.join("usr")).unwrap();

    let mut step = build_step("true", Vec::new());
    step.sandbox_mounts.push(SandboxMount {
        host_path: RelativePathBuf::from("/opt/extra"),
        sandbox_path: RelativePathBuf::from("/opt/extra"),
        read_write: false,
        no_local: false,
        no_fail: true,
    });

    let own_workspace_abs = tmp.path().join("build").join("app").join("workspace");
    let resolve_path = |_: &Step| root_fs.clone();
    let plan = SandboxPlan {
        namespace_sandbox_bin: std::path::Path::new("/bob/bin/namespace-sandbox"),
        root_fs: &root_fs,
        own_workspace_abs: &own_workspace_abs,
        debug: false,
        resolve_path: &resolve_path,
    };
    let req = RunRequest {
        step: &step,
        extra_paths: &[],
        library_paths: &[],
        clean_workspace: false,
        sandbox: Some(plan),
        env_whitelist: &[],
        preserve_env: false,
    };

    let composed = compose_scripts(&req).unwrap();
    assert!(composed.wrapper.contains("namespace-sandbox"));
    assert!(composed.wrapper.contains("-m /usr"));
    assert!(composed.wrapper.contains("if [[ -e /opt/extra ]]"));
}

#[rstest]
fn write_scripts_creates_executable_wrapper() {
    let tmp = TempDir::new().unwrap();
    let workspace = tmp.path().join("build").join("app").join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();

    let step = build_step("true", Vec::new());
    let req = RunRequest {
        step: &step,
        extra_paths: &[],
        library_paths: &[],
        clean_workspace: false,
        sandbox: None,
        env_whitelist: &[],
        preserve_env: false,
    };
    let composed = compose_scripts(&req).unwrap();

    let wrapper_path = write_scripts(&workspace, StepKind::Build, &composed).unwrap();
    assert_eq!(wrapper_path, tmp.path().join("build").join("app").join("build.sh"));
    assert!(wrapper_path.exists());
    assert!(tmp.path().join("build").join("app").join("script").exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&wrapper_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o775);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn run_shell_regular_mode_succeeds() {
    let tmp = TempDir::new().unwrap();
    let wrapper = tmp.path().join("build.sh");
    std::fs::write(&wrapper, "#!/bin/bash\nexit 0\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let outcome = run_shell(
        &wrapper,
        tmp.path(),
        true,
        &[],
        &HashMap::new(),
        Verbosity::Normal,
        false,
        StdioMode::Regular,
    )
    .await
    .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert!(!outcome.interrupted);
    assert!(outcome.buffered_output.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn run_shell_buffered_mode_captures_failure_output() {
    let tmp = TempDir::new().unwrap();
    let wrapper = tmp.path().join("build.sh");
    std::fs::write(&wrapper, "#!/bin/bash\necho boom >&2\nexit 7\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let err = run_shell(
        &wrapper,
        tmp.path(),
        true,
        &[],
        &HashMap::new(),
        Verbosity::Normal,
        false,
        StdioMode::Buffered,
    )
    .await
    .unwrap_err();

    match err {
        bob_error::Error::Build(build_err) => {
            let message = build_err.to_string();
            assert!(message.contains('7'));
            assert!(message.contains("boom"));
        }
        other => panic!("expected BuildError, got {other:?}"),
    }
}
