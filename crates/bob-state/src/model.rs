// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use bob_digest::Digest;
use relative_path::RelativePathBuf;
use serde::{Deserialize, Serialize};

/// The "directory state" of a workspace, compared between runs to decide
/// whether a step's workspace must be pruned or a checkout's SCM
/// directories must be atticized.
///
/// Checkout steps store one digest per SCM subdirectory plus a sentinel
/// entry (`None`) carrying the step's aggregate variant-id -- the "sentinel
/// key for the aggregate checkout variant-id" in `spec.md §3`. Build and
/// package steps store the flat "build digest" vector described in
/// `spec.md §4.3`: the incremental variant-id followed by this step's exec
/// path and each valid dependency's exec path, all compared as opaque
/// strings since a change in shape (not just value) must also be detected.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DirectoryState {
    Checkout(BTreeMap<Option<RelativePathBuf>, Digest>),
    Build(Vec<String>),
}

impl DirectoryState {
    /// The non-sentinel SCM entries of a checkout directory state.
    pub fn scm_entries(&self) -> BTreeMap<RelativePathBuf, Digest> {
        match self {
            DirectoryState::Checkout(map) => map
                .iter()
                .filter_map(|(k, v)| k.clone().map(|k| (k, *v)))
                .collect(),
            DirectoryState::Build(_) => BTreeMap::new(),
        }
    }
}

/// The ordered list of dependency result hashes a step ran with last time,
/// in the three forms `spec.md §3` invariant 3 describes for package steps.
/// Checkout and build steps only ever use [`InputHashes::Plain`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum InputHashes {
    /// Checkout/build steps, and package steps built locally before the
    /// build-id-prefixed form was introduced (silently upgraded on read).
    Plain(Vec<Digest>),
    /// A package step built locally: its build-id followed by the result
    /// hashes of the checkout step and every dependency step.
    Built { build_id: Digest, deps: Vec<Digest> },
    /// A package step whose artifact was downloaded from the archive.
    Downloaded { build_id: Digest },
}

impl InputHashes {
    /// Decode into `(build_id, deps, was_downloaded)` the way the package
    /// step executor needs, silently upgrading the legacy bare-list form.
    pub fn as_package_parts(&self) -> (Option<Digest>, Option<Vec<Digest>>, bool) {
        match self {
            InputHashes::Built { build_id, deps } => (Some(*build_id), Some(deps.clone()), false),
            InputHashes::Downloaded { build_id } => (Some(*build_id), None, true),
            InputHashes::Plain(deps) => (None, Some(deps.clone()), false),
        }
    }
}

/// The result hash of a workspace, or a sentinel marking "a step is
/// currently running against this workspace and its result is undefined".
/// The sentinel is restored to a real value only on successful completion,
/// satisfying the crash-safety invariant in `spec.md §3` invariant 4: a
/// crash mid-run leaves the sentinel in place so the next run reruns the
/// step rather than trusting stale content.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResultHash {
    Complete(Digest),
    InProgress,
}

impl ResultHash {
    pub fn completed(&self) -> Option<Digest> {
        match self {
            ResultHash::Complete(d) => Some(*d),
            ResultHash::InProgress => None,
        }
    }
}

/// The last run's `was_run` map and predicted source build-ids, persisted
/// so that `--resume` can skip work a previous, possibly-interrupted, run
/// already finished.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BuildState {
    /// workspace path -> (variant-id, is_checkout_step) for every step that
    /// completed in the last run.
    pub was_run: BTreeMap<String, (Digest, bool)>,
    /// (workspace path, variant-id) -> (build-id, predicted) for checkout
    /// steps whose build-id was obtained via live-build-id prediction.
    pub predicted_src_build_ids: BTreeMap<(String, Digest), (Digest, bool)>,
}
