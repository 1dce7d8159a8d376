// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use bob_digest::Digest;

use crate::Step;

/// Facts the executor gathers about a completed step, handed to the audit
/// collaborator to render into `audit.json.gz`. The actual record format is
/// owned entirely by that collaborator; the core only supplies these facts.
pub struct AuditFacts<'a> {
    pub step: &'a Step,
    pub variant_id: Digest,
    pub build_id: Digest,
    pub result_hash: Digest,
    /// `false` when the step was skipped and this is a re-audit of an
    /// unchanged result -- in that case tool/sandbox/arg provenance is not
    /// re-gathered.
    pub executed: bool,
}

/// The external collaborator that renders an [`AuditFacts`] into a
/// persisted audit record. Format and storage are entirely out of scope
/// here.
pub trait AuditWriter: Send + Sync {
    /// Write the audit record for `facts` next to the step's workspace and
    /// return the path it was written to (`workspace/../audit.json.gz`).
    fn write(&self, facts: AuditFacts<'_>, workspace_parent: &Path) -> std::io::Result<PathBuf>;
}
