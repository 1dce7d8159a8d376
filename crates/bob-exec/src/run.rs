// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use bob_error::Result;
use bob_harness::{compose_scripts, run_shell, write_scripts, RunRequest, SandboxPlan};
use bob_step::{Step, StepKind};

use crate::context::ExecContext;

/// Link the dependency symlink farm, compose and write the wrapper/prolog
/// scripts, then execute the wrapper. Mirrors the original's `_runShell`.
pub(crate) async fn run_step_script(
    ctx: &ExecContext<'_>,
    step: &Step,
    kind: StepKind,
    clean_workspace: bool,
) -> Result<()> {
    let workspace = ctx.abs_path(step);

    let deps_dir = ctx.workspace_parent(step).join("deps");
    bob_workspace::link_dependencies(step, &deps_dir, |s| ctx.abs_path(s))?;

    let sandbox_root;
    let resolve_dep_path = |s: &Step| ctx.abs_path(s);
    let sandbox_plan = if let (Some(sandbox_step), Some(settings)) = (&step.deps.sandbox, &ctx.config.sandbox) {
        sandbox_root = ctx.abs_path(sandbox_step);
        Some(SandboxPlan {
            namespace_sandbox_bin: settings.namespace_sandbox_bin.as_path(),
            root_fs: &sandbox_root,
            own_workspace_abs: &workspace,
            debug: settings.debug,
            resolve_path: &resolve_dep_path,
        })
    } else {
        None
    };

    let req = RunRequest {
        step,
        extra_paths: &ctx.config.extra_paths,
        library_paths: &ctx.config.library_paths,
        clean_workspace,
        sandbox: sandbox_plan,
        env_whitelist: &ctx.config.env_whitelist,
        preserve_env: ctx.config.preserve_env,
    };

    let composed = compose_scripts(&req)?;
    let wrapper_path = write_scripts(&workspace, kind, &composed)?;

    run_shell(
        &wrapper_path,
        &workspace,
        ctx.config.preserve_env,
        &ctx.config.env_whitelist,
        &composed.step_env,
        ctx.config.verbosity,
        ctx.config.no_log_file,
        ctx.config.stdio,
    )
    .await?;

    Ok(())
}
