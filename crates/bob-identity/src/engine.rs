// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use bob_digest::{Digest, Hasher};
use bob_step::{ArchiveHandle, Step};
use relative_path::RelativePathBuf;
use bob_state::StateStore;

use crate::{Error, Result};

fn live_id_key(step: &Step) -> Vec<u8> {
    let mut key = vec![0u8];
    key.extend_from_slice(step.variant_id.as_bytes());
    key
}

fn translate_key(live_id: Digest) -> Vec<u8> {
    let mut key = vec![1u8];
    key.extend_from_slice(live_id.as_bytes());
    key
}

/// Computes variant-ids, incremental variant-ids and build-ids for steps,
/// and runs the live-build-id protocol for checkout steps.
///
/// One engine is created per build run: its in-memory caches
/// (`src_build_ids`, `dist_build_ids`) are scoped to that run and must be
/// dropped (or cleared via
/// [`reset_dist_build_ids`](IdentityEngine::reset_dist_build_ids)) on a
/// mispredict restart, while the caches persisted through `state` (the
/// predicted-src-build-id map and the live-id translation cache) survive
/// across runs.
pub struct IdentityEngine {
    state: Arc<StateStore>,
    archive: Arc<dyn ArchiveHandle>,
    src_build_ids: Mutex<HashMap<(RelativePathBuf, Digest), (Digest, bool)>>,
    dist_build_ids: Mutex<HashMap<RelativePathBuf, Digest>>,
}

impl IdentityEngine {
    pub fn new(state: Arc<StateStore>, archive: Arc<dyn ArchiveHandle>) -> Self {
        Self {
            state,
            archive,
            src_build_ids: Mutex::new(HashMap::new()),
            dist_build_ids: Mutex::new(HashMap::new()),
        }
    }

    /// The variant-id with respect to the current workspace state: the
    /// recipe-true variant-id for every dependency that has no stored
    /// variant-id from a prior run (a fresh or deleted workspace), and the
    /// last *stored* variant-id otherwise. Only reliable once every
    /// dependency has been cooked in this run.
    pub fn incremental_variant_id(&self, step: &Step) -> Digest {
        step.digest.compute(&|dep| self.stored_or_real_variant_id(dep))
    }

    fn stored_or_real_variant_id(&self, step: &Step) -> Digest {
        match self.state.variant_id(step.workspace_path.as_str()) {
            Ok(Some(stored)) => stored,
            Ok(None) => step.variant_id,
            Err(err) => {
                tracing::warn!(path = %step.workspace_path, %err, "failed to read stored variant-id, using recipe value");
                step.variant_id
            }
        }
    }

    // -- live-build-id protocol (checkout steps only) -----------------------

    /// Whether every SCM backing this checkout step can predict a
    /// live-build-id. A step with no SCMs at all (an empty checkout) cannot.
    pub fn has_live_build_id(step: &Step) -> bool {
        !step.scm_list.is_empty() && step.scm_list.iter().all(|scm| scm.has_live_build_id())
    }

    /// Predict a live-build-id by combining the prediction of every SCM
    /// backing this step into one digest. `None` if any SCM declines.
    pub async fn predict_live_build_id(step: &Step) -> Option<Digest> {
        if !Self::has_live_build_id(step) {
            return None;
        }
        let mut hasher = Hasher::default();
        for scm in &step.scm_list {
            let part = scm.predict_live_build_id().await?;
            hasher.write_all(&part).ok()?;
        }
        Some(hasher.digest())
    }

    /// Query (and cache) the live-build-id of a checkout step. In
    /// `build_only` mode, a cached value from a previous run is reused
    /// without re-querying the SCM.
    pub async fn query_live_build_id(&self, step: &Step, build_only: bool) -> Result<Option<Digest>> {
        let key = live_id_key(step);
        if build_only {
            if let Some(cached) = self.state.build_id(&key)? {
                return Ok(Some(cached));
            }
        }

        let Some(live_id) = Self::predict_live_build_id(step).await else {
            return Ok(None);
        };
        self.state.set_build_id(&key, live_id)?;
        Ok(Some(live_id))
    }

    /// Forget a previously queried live-build-id, so the next run re-queries
    /// the SCM. Called when a prediction turned out to be wrong.
    pub fn invalidate_live_build_id(&self, step: &Step) -> Result<()> {
        let key = live_id_key(step);
        if self.state.build_id(&key)?.is_some() {
            self.state.del_build_id(&key)?;
        }
        Ok(())
    }

    /// Translate a live-build-id into a real build-id via the archive,
    /// caching the mapping (which, unlike the src-build-id cache, is never
    /// invalidated by a mispredict -- it records a fact about the archive's
    /// contents, not a prediction about this run).
    pub async fn translate_live_build_id(&self, step: &Step, live_id: Digest) -> Result<Option<Digest>> {
        let key = translate_key(live_id);
        if let Some(build_id) = self.state.build_id(&key)? {
            return Ok(Some(build_id));
        }

        let build_id = self
            .archive
            .download_local_live_build_id(step, live_id.as_bytes())
            .await;
        if let Some(build_id) = build_id {
            self.state.set_build_id(&key, build_id)?;
        }
        Ok(build_id)
    }

    // -- per-run build-id cache ----------------------------------------------

    /// The cached build-id of a checkout step, if one was already recorded
    /// this run (via a live-id translation or an actual checkout), along
    /// with whether it was a prediction.
    pub fn cached_checkout_build_id(&self, step: &Step) -> Option<(Digest, bool)> {
        let key = (step.workspace_path.clone(), step.variant_id);
        self.src_build_ids.lock().unwrap().get(&key).copied()
    }

    /// Record a checkout step's build-id as a live-id prediction, before the
    /// checkout has actually run.
    pub fn cache_predicted_checkout_build_id(&self, step: &Step, build_id: Digest) {
        let key = (step.workspace_path.clone(), step.variant_id);
        self.src_build_ids.lock().unwrap().insert(key, (build_id, true));
    }

    /// Record the outcome of an actual checkout. Returns `true` if this
    /// invalidates a previously used prediction and the caller must trigger
    /// **mispredict recovery**: clear its own `was_run` bookkeeping and
    /// restart the build from the top with the same roots.
    pub fn record_checkout_result(&self, step: &Step, result_hash: Digest) -> Result<bool> {
        let key = (step.workspace_path.clone(), step.variant_id);
        let previous = self.src_build_ids.lock().unwrap().get(&key).copied();

        match previous {
            Some((predicted, true)) if predicted != result_hash => {
                self.invalidate_live_build_id(step)?;
                self.src_build_ids
                    .lock()
                    .unwrap()
                    .insert(key, (result_hash, false));
                self.dist_build_ids.lock().unwrap().clear();
                Ok(true)
            }
            _ => {
                self.src_build_ids
                    .lock()
                    .unwrap()
                    .insert(key, (result_hash, false));
                Ok(false)
            }
        }
    }

    /// The build-id of any step: for checkout steps, the cached result of
    /// [`record_checkout_result`](Self::record_checkout_result) or
    /// [`cache_predicted_checkout_build_id`](Self::cache_predicted_checkout_build_id);
    /// for other steps, a hash of the step's definition with every
    /// dependency's build-id substituted in, computed and cached
    /// recursively. Dependencies must already have been cooked.
    pub fn build_id(&self, step: &Step) -> Result<Digest> {
        if step.is_checkout() {
            return self
                .cached_checkout_build_id(step)
                .map(|(id, _)| id)
                .ok_or_else(|| Error::UncookedDependency(step.workspace_path.to_string()));
        }

        if let Some(cached) = self.dist_build_ids.lock().unwrap().get(&step.workspace_path).copied() {
            return Ok(cached);
        }

        let dep_err = std::cell::RefCell::new(None);
        let id = step.digest.compute(&|dep| match self.build_id(dep) {
            Ok(id) => id,
            Err(err) => {
                dep_err.borrow_mut().get_or_insert(err);
                bob_digest::NULL_DIGEST
            }
        });
        if let Some(err) = dep_err.into_inner() {
            return Err(err);
        }

        self.dist_build_ids
            .lock()
            .unwrap()
            .insert(step.workspace_path.clone(), id);
        Ok(id)
    }

    /// Clear the per-run build-id caches. Called as part of mispredict
    /// recovery's "clear all cached non-checkout build-ids" step; the
    /// checkout build-id cache is fixed up in place by
    /// [`record_checkout_result`](Self::record_checkout_result) instead of
    /// being cleared, since it already holds the corrected value.
    pub fn reset_dist_build_ids(&self) {
        self.dist_build_ids.lock().unwrap().clear();
    }

    /// Seed the per-run checkout build-id cache with predictions carried
    /// over from a previous run (`--resume`), so the scheduler doesn't have
    /// to re-query a live-build-id it already translated last time.
    pub fn seed_predicted_checkout_build_ids(
        &self,
        entries: impl IntoIterator<Item = (RelativePathBuf, Digest, Digest)>,
    ) {
        let mut map = self.src_build_ids.lock().unwrap();
        for (path, variant_id, build_id) in entries {
            map.insert((path, variant_id), (build_id, true));
        }
    }

    /// Every checkout build-id currently cached as a live-id prediction
    /// (not an actual checkout result), for persisting into `BuildState`
    /// across runs. Mirrors the original's `saveBuildState`.
    pub fn predicted_checkout_build_ids(&self) -> Vec<(RelativePathBuf, Digest, Digest)> {
        self.src_build_ids
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (_, predicted))| *predicted)
            .map(|((path, variant_id), (build_id, _))| (path.clone(), *variant_id, *build_id))
            .collect()
    }
}
