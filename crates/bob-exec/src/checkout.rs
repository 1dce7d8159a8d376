// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashSet};
use std::io::Write as _;

use bob_digest::{Digest, Hasher};
use bob_error::{BuildError, Error, Result};
use bob_identity::IdentityEngine;
use bob_state::{DirectoryState, InputHashes, ResultHash};
use bob_step::{ScmStatus, Step, StepKind};
use relative_path::RelativePathBuf;

use crate::audit::generate_audit;
use crate::context::ExecContext;
use crate::error::infra;
use crate::run::run_step_script;

/// The outcome of cooking a checkout step: whether the identity engine's
/// mispredict recovery fired and the scheduler must restart the whole run.
pub struct CheckoutOutcome {
    pub restart: bool,
}

fn empty_checkout_state() -> DirectoryState {
    DirectoryState::Checkout(BTreeMap::new())
}

/// Combine every SCM's *already checked out* live-build-id into one digest,
/// mirroring `IdentityEngine::predict_live_build_id` but calling
/// `calc_live_build_id` instead of `predict_live_build_id`.
async fn calc_live_build_id(step: &Step) -> Option<Digest> {
    if !IdentityEngine::has_live_build_id(step) {
        return None;
    }
    let mut hasher = Hasher::default();
    for scm in &step.scm_list {
        let part = scm.calc_live_build_id().await?;
        hasher.write_all(&part).ok()?;
    }
    Some(hasher.digest())
}

/// Actually check out `step`: construct/rehash/rerun as needed, assuming
/// every dependency has already been cooked (`spec.md §4.5.1`).
pub async fn cook_checkout_step(ctx: &ExecContext<'_>, step: &Step) -> Result<CheckoutOutcome> {
    let workspace = ctx.abs_path(step);
    let path_key = step.workspace_path.as_str();

    let (_, created) = bob_workspace::construct_dir(&workspace)?;
    let mut old_state = ctx.state.directory_state(path_key).map_err(infra)?.unwrap_or_else(empty_checkout_state);
    if created {
        old_state = empty_checkout_state();
        ctx.state.reset_workspace_state(path_key, old_state.clone()).map_err(infra)?;
    }

    let mut checkout_state_map: BTreeMap<Option<RelativePathBuf>, Digest> = BTreeMap::new();
    for scm in &step.scm_list {
        for (dir, digest) in scm.get_directories() {
            checkout_state_map.insert(Some(dir), digest);
        }
    }
    checkout_state_map.insert(None, step.variant_id);
    let checkout_state = DirectoryState::Checkout(checkout_state_map.clone());

    let mut executed = false;

    if ctx.config.build_only && ctx.state.result_hash(path_key).map_err(infra)?.is_some() {
        if checkout_state != old_state {
            tracing::warn!(path = path_key, "recipe changed but skipped due to build-only");
        } else {
            tracing::info!(path = path_key, "checkout skipped due to build-only");
        }
    } else {
        // Dirs whose stored digest matches the recipe but whose on-disk SCM
        // status is dirty/error are force-invalidated, even though their
        // digest hasn't changed -- `--clean-checkout`'s whole point.
        let mut forced_stale: HashSet<RelativePathBuf> = HashSet::new();
        if ctx.config.clean_checkout {
            if let DirectoryState::Checkout(map) = &old_state {
                for (dir_opt, digest) in map {
                    let Some(dir) = dir_opt else { continue };
                    if checkout_state_map.get(&Some(dir.clone())) != Some(digest) {
                        continue;
                    }
                    for scm in &step.scm_list {
                        if scm.get_directories().contains_key(dir) {
                            let status = scm.status(&step.workspace_path).await;
                            if matches!(status, ScmStatus::Dirty | ScmStatus::Error) {
                                forced_stale.insert(dir.clone());
                            }
                        }
                    }
                }
            }
        }

        let checkout_input_hashes: Vec<Digest> = step
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

        let stored_result_hash = ctx.state.result_hash(path_key).map_err(infra)?;
        let stored_input_hashes = ctx.state.input_hashes(path_key).map_err(infra)?;
        let input_hashes_changed = !matches!(&stored_input_hashes, Some(InputHashes::Plain(v)) if *v == checkout_input_hashes);

        let should_rerun = ctx.config.force
            || !step.is_deterministic
            || stored_result_hash.is_none()
            || checkout_state != old_state
            || !forced_stale.is_empty()
            || input_hashes_changed;

        if should_rerun {
            // Move every changed or force-invalidated SCM dir to the attic.
            let attic_root = ctx.workspace_parent(step).join("attic");
            let mut stale_dirs = Vec::new();
            if let DirectoryState::Checkout(map) = &old_state {
                for (dir_opt, digest) in map {
                    let Some(dir) = dir_opt else { continue };
                    let changed = checkout_state_map.get(&Some(dir.clone())) != Some(digest);
                    if changed || forced_stale.contains(dir) {
                        stale_dirs.push(dir.clone());
                    }
                }
            }
            for dir in &stale_dirs {
                let scm_path = workspace.join(dir.as_str());
                if scm_path.exists() {
                    bob_workspace::atticize(&scm_path, &attic_root)?;
                }
            }
            if let DirectoryState::Checkout(map) = &mut old_state {
                for dir in &stale_dirs {
                    map.remove(&Some(dir.clone()));
                }
            }
            if !stale_dirs.is_empty() {
                ctx.state.set_directory_state(path_key, &old_state).map_err(infra)?;
            }

            // New SCM checkouts must not collide with pre-existing files.
            for dir_opt in checkout_state_map.keys() {
                let Some(dir) = dir_opt else { continue };
                if dir.as_str() == "." {
                    continue;
                }
                let already_present = matches!(&old_state, DirectoryState::Checkout(map) if map.contains_key(&Some(dir.clone())));
                if already_present {
                    continue;
                }
                let scm_path = workspace.join(dir.as_str());
                if scm_path.exists() {
                    return Err(Error::Build(BuildError::new(format!(
                        "new SCM checkout '{dir}' collides with existing file in workspace '{}'",
                        workspace.display()
                    ))));
                }
            }

            // Record the SCM-only state (no sentinel) so a crash mid-checkout
            // still remembers what actually got checked out.
            let scm_only = DirectoryState::Checkout(
                checkout_state_map.iter().filter(|(k, _)| k.is_some()).map(|(k, v)| (k.clone(), *v)).collect(),
            );
            ctx.state.set_directory_state(path_key, &scm_only).map_err(infra)?;

            if stored_result_hash.is_some() {
                ctx.state.set_result_hash(path_key, ResultHash::InProgress).map_err(infra)?;
            }

            run_step_script(ctx, step, StepKind::Checkout, false).await?;

            executed = true;
            ctx.state.set_directory_state(path_key, &checkout_state).map_err(infra)?;
            ctx.state.set_input_hashes(path_key, &InputHashes::Plain(checkout_input_hashes)).map_err(infra)?;
            ctx.state
                .set_variant_id(path_key, ctx.identity.incremental_variant_id(step))
                .map_err(infra)?;
        } else {
            tracing::info!(path = path_key, "checkout skipped (fixed package)");
        }
    }

    // We always rehash: the user may have changed checked-out sources by hand.
    let old_checkout_hash = ctx.state.result_hash(path_key).map_err(infra)?.and_then(|rh| rh.completed());
    let checkout_hash = bob_workspace::hash_workspace(&workspace)?;
    ctx.state.set_result_hash(path_key, ResultHash::Complete(checkout_hash)).map_err(infra)?;

    if Some(checkout_hash) != old_checkout_hash || executed {
        generate_audit(ctx, step, checkout_hash, executed)?;
    }

    if created && ctx.archive.can_upload_local() && IdentityEngine::has_live_build_id(step) {
        if let Some(live_id) = calc_live_build_id(step).await {
            ctx.archive.upload_local_live_build_id(step, live_id.as_bytes(), checkout_hash).await;
        }
    }

    let restart = ctx.identity.record_checkout_result(step, checkout_hash).map_err(infra)?;

    Ok(CheckoutOutcome { restart })
}

/// Obtain a checkout step's build-id without necessarily performing the
/// checkout: try a live-build-id prediction first, falling back to an
/// actual checkout when prediction isn't available or doesn't translate.
/// Returns `(build_id, predicted, restart_needed)`.
pub async fn resolve_checkout_build_id(ctx: &ExecContext<'_>, step: &Step) -> Result<(Digest, bool, bool)> {
    let workspace = ctx.abs_path(step);
    let can_predict = !workspace.exists()
        && !ctx.config.is_always_checkout(&step.package_name)
        && IdentityEngine::has_live_build_id(step)
        && ctx.archive.can_download_local();

    if can_predict {
        if let Some(live_id) = ctx.identity.query_live_build_id(step, ctx.config.build_only).await.map_err(infra)? {
            if let Some(build_id) = ctx.identity.translate_live_build_id(step, live_id).await.map_err(infra)? {
                ctx.identity.cache_predicted_checkout_build_id(step, build_id);
                return Ok((build_id, true, false));
            }
        }
    }

    let outcome = cook_checkout_step(ctx, step).await?;
    let path_key = step.workspace_path.as_str();
    let result_hash = ctx
        .state
        .result_hash(path_key)
        .map_err(infra)?
        .and_then(|rh| rh.completed())
        .ok_or_else(|| infra("checkout step finished without a result hash"))?;

    Ok((result_hash, false, outcome.restart))
}
