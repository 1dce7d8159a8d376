// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use bob_error::Result;
use bob_state::{DirectoryState, ResultHash};
use bob_step::{Step, StepKind};

use crate::audit::generate_audit;
use crate::context::ExecContext;
use crate::error::infra;
use crate::run::run_step_script;

/// The build-digest used for prune decisions: the incremental variant-id,
/// this step's exec path, and each argument's exec path, all as opaque
/// strings since a change in shape must also be caught (`spec.md §4.3`).
fn build_digest(ctx: &ExecContext<'_>, step: &Step) -> Vec<String> {
    let mut digest = vec![ctx.identity.incremental_variant_id(step).to_hex(), step.exec_path.to_string()];
    digest.extend(step.deps.arguments.iter().map(|arg| arg.exec_path.to_string()));
    digest
}

/// Build `step`, assuming every dependency has already been cooked
/// (`spec.md §4.5.2`).
pub async fn cook_build_step(ctx: &ExecContext<'_>, step: &Step) -> Result<()> {
    let workspace = ctx.abs_path(step);
    let path_key = step.workspace_path.as_str();

    let digest = build_digest(ctx, step);
    let (_, created) = bob_workspace::construct_dir(&workspace)?;
    let old_digest = ctx.state.directory_state(path_key).map_err(infra)?;
    let digest_changed = !matches!(&old_digest, Some(DirectoryState::Build(v)) if *v == digest);

    if created || digest_changed {
        if !created && workspace.exists() {
            tracing::warn!(path = path_key, "pruning workspace, recipe changed");
            bob_workspace::empty_directory(&workspace)?;
        }
        ctx.state
            .reset_workspace_state(path_key, DirectoryState::Build(digest.clone()))
            .map_err(infra)?;
    }

    let build_input_hashes: Vec<bob_digest::Digest> = step
        .deps
        .all()
        .iter()
        .map(|dep| {
            ctx.state
                .result_hash(dep.workspace_path.as_str())
                .map(|opt| opt.and_then(|rh| rh.completed()).unwrap_or(bob_digest::NULL_DIGEST))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(infra)?;

    if ctx.config.checkout_only {
        tracing::info!(path = path_key, "build skipped due to checkout-only");
        return Ok(());
    }

    let stored_input_hashes = ctx.state.input_hashes(path_key).map_err(infra)?;
    let unchanged = matches!(&stored_input_hashes, Some(bob_state::InputHashes::Plain(v)) if *v == build_input_hashes);

    if !ctx.config.force && unchanged {
        tracing::info!(path = path_key, "build skipped (unchanged input)");
        // Rehash in development mode: the user may have compiled by hand.
        if !ctx.config.clean_build {
            let hash = bob_workspace::hash_workspace(&workspace)?;
            ctx.state.set_result_hash(path_key, ResultHash::Complete(hash)).map_err(infra)?;
        }
        return Ok(());
    }

    ctx.state.del_input_hashes(path_key).map_err(infra)?;
    ctx.state.set_result_hash(path_key, ResultHash::InProgress).map_err(infra)?;

    run_step_script(ctx, step, StepKind::Build, ctx.config.clean_build).await?;

    let build_hash = bob_workspace::hash_workspace(&workspace)?;
    generate_audit(ctx, step, build_hash, true)?;

    ctx.state.set_result_hash(path_key, ResultHash::Complete(build_hash)).map_err(infra)?;
    ctx.state.set_variant_id(path_key, ctx.identity.incremental_variant_id(step)).map_err(infra)?;
    ctx.state
        .set_input_hashes(path_key, &bob_state::InputHashes::Plain(build_input_hashes))
        .map_err(infra)?;

    Ok(())
}
