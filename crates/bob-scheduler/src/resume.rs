// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Mutex;

use bob_error::Result;
use bob_identity::IdentityEngine;
use bob_state::{BuildState, StateStore};
use bob_step::Step;
use relative_path::RelativePathBuf;

use crate::error::infra;

/// `--resume` bookkeeping: which steps already completed in a run that was
/// interrupted (or simply finished) before this one, so a later run can
/// skip them. Mirrors the original's `__wasRun`/`__wasSkipped` pair.
pub struct ResumeTracker {
    was_run: Mutex<BuildState>,
    /// Steps that completed this run under `--checkout-only`: recorded
    /// in-memory only so a later, full-build request for the same step
    /// still reruns it, and so they never get persisted as "done".
    was_skipped: Mutex<HashMap<String, bool>>,
}

impl ResumeTracker {
    /// Load whatever `--resume` state a previous run persisted, or start
    /// from an empty one.
    pub fn load(store: &StateStore) -> Result<Self> {
        let state = store.build_state().map_err(infra)?.unwrap_or_default();
        Ok(Self { was_run: Mutex::new(state), was_skipped: Mutex::new(HashMap::new()) })
    }

    /// Whether `step` was already cooked by a previous run (or an earlier
    /// restart iteration of this one) and can be skipped. `checkout_only`
    /// is the *current* request's mode: a step only ever completed under
    /// `--checkout-only` must still run once a full build asks for it.
    pub fn was_already_run(&self, step: &Step, checkout_only: bool) -> bool {
        let path = step.workspace_path.as_str();
        let mut was_run = self.was_run.lock().unwrap();
        let Some((digest, _is_checkout)) = was_run.was_run.get(path).copied() else {
            return false;
        };
        if digest != step.variant_id {
            was_run.was_run.remove(path);
            return false;
        }
        if !checkout_only && self.was_skipped.lock().unwrap().get(path).copied().unwrap_or(false) {
            return false;
        }
        true
    }

    pub fn set_already_run(&self, step: &Step, is_checkout_step: bool, skipped: bool) {
        let path = step.workspace_path.as_str().to_string();
        self.was_run.lock().unwrap().was_run.insert(path.clone(), (step.variant_id, is_checkout_step));
        self.was_skipped.lock().unwrap().insert(path, skipped);
    }

    /// Drop was-run bookkeeping for build and package steps. Part of
    /// mispredict recovery: checkout entries are left in place since they
    /// reflect work that really did happen, build-id or not.
    pub fn clear_was_run(&self) {
        self.was_run.lock().unwrap().was_run.retain(|_, (_, is_checkout)| *is_checkout);
    }

    /// Persist the current was-run map (minus anything only completed
    /// under `--checkout-only`) plus the identity engine's predicted
    /// checkout build-ids, for a future `--resume` run.
    pub fn save(&self, store: &StateStore, identity: &IdentityEngine) -> Result<()> {
        let was_skipped = self.was_skipped.lock().unwrap();
        let mut state = self.was_run.lock().unwrap().clone();
        state.was_run.retain(|path, _| !was_skipped.get(path).copied().unwrap_or(false));

        state.predicted_src_build_ids.clear();
        for (path, variant_id, build_id) in identity.predicted_checkout_build_ids() {
            state.predicted_src_build_ids.insert((path.to_string(), variant_id), (build_id, true));
        }

        store.set_build_state(&state).map_err(infra)
    }

    /// Seed a freshly created identity engine with predictions carried
    /// over from a previous run, so it doesn't re-query live-build-ids it
    /// already translated.
    pub fn seed_identity(&self, identity: &IdentityEngine) {
        let entries: Vec<(RelativePathBuf, _, _)> = self
            .was_run
            .lock()
            .unwrap()
            .predicted_src_build_ids
            .iter()
            .map(|((path, variant_id), (build_id, _))| (RelativePathBuf::from(path.clone()), *variant_id, *build_id))
            .collect();
        identity.seed_predicted_checkout_build_ids(entries);
    }
}
