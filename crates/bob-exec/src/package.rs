// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use bob_digest::Digest;
use bob_error::{BuildError, Error, Result};
use bob_state::{DirectoryState, InputHashes, ResultHash};
use bob_step::{Step, StepKind};

use crate::audit::generate_audit;
use crate::context::ExecContext;
use crate::error::infra;
use crate::run::run_step_script;

fn result_hash_of(ctx: &ExecContext<'_>, step: &Step) -> Result<Digest> {
    ctx.state
        .result_hash(step.workspace_path.as_str())
        .map(|opt| opt.and_then(|rh| rh.completed()).unwrap_or(bob_digest::NULL_DIGEST))
        .map_err(infra)
}

/// Package (install/stage) `step`, assuming every dependency -- and its own
/// checkout step -- has already been cooked (`spec.md §4.5.3`). `depth` is
/// this package's distance from a root step, used against the configured
/// download mode's thresholds (`spec.md §4.5.4`). `checkout_step` is the
/// package's own checkout step, supplied by the caller since the
/// package-graph relationship between them lives outside this crate.
pub async fn cook_package_step(
    ctx: &ExecContext<'_>,
    step: &Step,
    checkout_step: Option<&Step>,
    depth: u32,
) -> Result<()> {
    let workspace = ctx.abs_path(step);
    let path_key = step.workspace_path.as_str();

    let package_digest = DirectoryState::Build(vec![step.variant_id.to_hex()]);
    let (_, created) = bob_workspace::construct_dir(&workspace)?;
    let old_digest = ctx.state.directory_state(path_key).map_err(infra)?;
    if created || Some(&package_digest) != old_digest.as_ref() {
        if !created && workspace.exists() {
            tracing::warn!(path = path_key, "pruning workspace, recipe changed");
            bob_workspace::empty_directory(&workspace)?;
        }
        ctx.state.reset_workspace_state(path_key, package_digest.clone()).map_err(infra)?;
    }

    let package_build_id =
        if step.is_relocatable || step.deps.sandbox.is_some() { Some(ctx.identity.build_id(step).map_err(infra)?) } else { None };

    let stored_input_hashes = ctx.state.input_hashes(path_key).map_err(infra)?;
    let (old_build_id, old_deps, old_was_downloaded) =
        stored_input_hashes.as_ref().map(InputHashes::as_package_parts).unwrap_or((None, None, false));

    let (download_depth, download_depth_force) = ctx.config.download_mode.depths(ctx.config.archive_reachable);

    let mut was_downloaded = false;
    let mut final_hash: Option<Digest> = None;
    let mut variant_to_store = step.variant_id;

    if !ctx.config.checkout_only && package_build_id.is_some() && depth >= download_depth {
        let build_id = package_build_id.expect("checked above");

        if (old_build_id.is_some() && old_build_id != Some(build_id)) || ctx.config.force {
            tracing::warn!(
                path = path_key,
                reason = if ctx.config.force { "build forced" } else { "build-id changed" },
                "pruning package workspace"
            );
            bob_workspace::empty_directory(&workspace)?;
            ctx.state.reset_workspace_state(path_key, package_digest.clone()).map_err(infra)?;
            ctx.state.del_input_hashes(path_key).map_err(infra)?;
        }

        if ctx.state.result_hash(path_key).map_err(infra)?.is_none() {
            let audit_path = ctx.workspace_parent(step).join("audit.json.gz");
            if ctx.archive.want_download() {
                let downloaded = ctx.archive.download_package(step, build_id, &audit_path, &workspace).await;
                if downloaded {
                    ctx.state.set_input_hashes(path_key, &InputHashes::Downloaded { build_id }).map_err(infra)?;
                    final_hash = Some(bob_workspace::hash_workspace(&workspace)?);
                    was_downloaded = true;
                } else if depth >= download_depth_force {
                    return Err(Error::Build(BuildError::new(format!("downloading artifact for '{path_key}' failed"))));
                }
            } else if depth >= download_depth_force {
                return Err(Error::Build(BuildError::new(format!(
                    "artifact for '{path_key}' must be downloaded but downloads are disabled"
                ))));
            }
        } else if old_was_downloaded && old_build_id == Some(build_id) {
            tracing::info!(path = path_key, "package skipped (already downloaded)");
            was_downloaded = true;
        }
    }

    if !was_downloaded {
        let mut inputs: Vec<&Step> = Vec::new();
        inputs.extend(checkout_step);
        let dep_steps = step.deps.all();
        inputs.extend(dep_steps.iter().map(|dep| dep.as_ref()));

        let package_input_hashes: Vec<Digest> =
            inputs.iter().map(|dep| result_hash_of(ctx, dep)).collect::<Result<Vec<_>>>()?;

        if ctx.config.checkout_only {
            tracing::info!(path = path_key, "package skipped due to checkout-only");
        } else if !ctx.config.force && old_deps.as_ref() == Some(&package_input_hashes) {
            tracing::info!(path = path_key, "package skipped (unchanged input)");
        } else {
            ctx.state.del_input_hashes(path_key).map_err(infra)?;
            ctx.state.set_result_hash(path_key, ResultHash::InProgress).map_err(infra)?;

            run_step_script(ctx, step, StepKind::Package, true).await?;

            let hash = bob_workspace::hash_workspace(&workspace)?;
            final_hash = Some(hash);
            variant_to_store = ctx.identity.incremental_variant_id(step);

            let audit_path = generate_audit(ctx, step, hash, true)?;
            if let Some(build_id) = package_build_id {
                if ctx.archive.want_upload() && ctx.archive.can_upload_local() {
                    ctx.archive.upload_package(step, build_id, &audit_path, &workspace).await;
                }
            }

            let new_input_hashes = match package_build_id {
                Some(build_id) => InputHashes::Built { build_id, deps: package_input_hashes },
                None => InputHashes::Plain(package_input_hashes),
            };
            ctx.state.set_input_hashes(path_key, &new_input_hashes).map_err(infra)?;
        }
    }

    if let Some(hash) = final_hash {
        ctx.state.set_result_hash(path_key, ResultHash::Complete(hash)).map_err(infra)?;
        ctx.state.set_variant_id(path_key, variant_to_store).map_err(infra)?;
    }

    Ok(())
}
