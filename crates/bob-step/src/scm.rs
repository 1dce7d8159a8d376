// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use async_trait::async_trait;
use bob_digest::Digest;
use relative_path::RelativePathBuf;

/// The result of inspecting a checked-out SCM directory on disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScmStatus {
    Clean,
    Dirty,
    Empty,
    Error,
}

/// What kind of audit record an SCM wants attached to a checkout's audit
/// trail: an opaque type tag plus the subdirectory it applies to. The
/// actual audit record is produced by an external collaborator.
#[derive(Clone, Debug)]
pub struct AuditSpec {
    pub kind: String,
    pub directory: RelativePathBuf,
}

/// The capability surface an SCM plugin (git/svn/url/...) exposes to the
/// core. SCM plugins themselves -- how to clone, pull, or export a URL --
/// are entirely out of scope here; the core only ever calls through this
/// trait.
#[async_trait]
pub trait ScmHandle: Send + Sync {
    /// The set of subdirectories (relative to the checkout workspace) this
    /// SCM manages, each paired with a digest of its configured definition
    /// (URL, revision, branch -- whatever the plugin considers identity).
    fn get_directories(&self) -> BTreeMap<RelativePathBuf, Digest>;

    /// Inspect the on-disk state of this SCM's directories within the given
    /// workspace.
    async fn status(&self, workspace: &RelativePathBuf) -> ScmStatus;

    /// Active recipe overrides in effect for this SCM instance, surfaced to
    /// the user as a diagnostic count, never interpreted by the core.
    fn get_active_overrides(&self) -> Vec<String>;

    /// Audit metadata for this SCM instance, if it wants one recorded.
    fn get_audit_spec(&self) -> Option<AuditSpec>;

    /// Whether this SCM can predict a live-build-id before checkout.
    fn has_live_build_id(&self) -> bool {
        false
    }

    /// Compute a live-build-id for an SCM directory that has *already* been
    /// checked out (used to seed the archive's live-id cache right after a
    /// fresh checkout).
    async fn calc_live_build_id(&self) -> Option<Vec<u8>> {
        None
    }

    /// Predict a live-build-id *before* checkout, used to decide whether a
    /// downstream artifact might be downloadable without doing the
    /// checkout at all.
    async fn predict_live_build_id(&self) -> Option<Vec<u8>> {
        None
    }
}
