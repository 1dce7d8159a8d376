// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use bob_digest::Digest;
use relative_path::RelativePathBuf;

use crate::scm::ScmHandle;

/// The three kinds of step the core schedules and executes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StepKind {
    /// Fetch sources via an SCM.
    Checkout,
    /// Compile or otherwise transform checked-out sources.
    Build,
    /// Install/stage a build's outputs into a relocatable artifact shape.
    Package,
}

impl StepKind {
    /// The directory-layout label the original tool uses for each step kind
    /// (`src`, `build`, `dist`), retained so log messages and on-disk paths
    /// read the same way.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Checkout => "src",
            StepKind::Build => "build",
            StepKind::Package => "dist",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            StepKind::Checkout => "checkout",
            StepKind::Build => "build",
            StepKind::Package => "package",
        }
    }
}

/// A single named mount requested by a sandbox step.
#[derive(Clone, Debug)]
pub struct SandboxMount {
    pub host_path: RelativePathBuf,
    pub sandbox_path: RelativePathBuf,
    pub read_write: bool,
    pub no_local: bool,
    pub no_fail: bool,
}

/// A step's direct dependencies, split the way the script harness and
/// identity engine need them: an ordered list of argument steps (become
/// `deps/args/NN-<pkgname>` and `$1 $2 ...` in the script), a named map of
/// tool steps (`deps/tools/<name>`), and at most one sandbox step.
#[derive(Clone, Default)]
pub struct Dependencies {
    pub arguments: Vec<Arc<Step>>,
    pub tools: BTreeMap<String, Arc<Step>>,
    pub sandbox: Option<Arc<Step>>,
}

impl Dependencies {
    /// All dependency steps in the traversal order the scheduler and
    /// identity engine use: `getAllDepSteps()` in the original -- sandbox
    /// first, then tools in name order, then arguments in declared order.
    pub fn all(&self) -> Vec<Arc<Step>> {
        let mut all = Vec::with_capacity(self.arguments.len() + self.tools.len() + 1);
        if let Some(sandbox) = &self.sandbox {
            all.push(Arc::clone(sandbox));
        }
        all.extend(self.tools.values().cloned());
        all.extend(self.arguments.iter().cloned());
        all
    }
}

/// The unit of execution the core schedules and runs.
///
/// Everything here is derived from the recipe graph by an external
/// collaborator; the core never parses recipes itself. `variant_id` is a
/// pure function of this struct's content and must be supplied by the
/// caller -- the core treats it as an opaque input, never recomputing it.
pub struct Step {
    pub kind: StepKind,
    pub variant_id: Digest,
    pub workspace_path: RelativePathBuf,
    pub exec_path: RelativePathBuf,
    pub deps: Dependencies,
    pub env: BTreeMap<String, String>,
    pub script: String,
    pub is_deterministic: bool,
    pub is_relocatable: bool,
    pub has_net_access: bool,
    pub sandbox_mounts: Vec<SandboxMount>,
    /// Present only for checkout steps.
    pub scm_list: Vec<Arc<dyn ScmHandle>>,
    /// The package and recipe this step belongs to, used for log labels
    /// and audit metadata. Opaque identifiers, not interpreted by the core.
    pub package_name: String,
    pub package_stack: Vec<String>,
    /// Recomputes this step's variant-id from the recipe graph, given a
    /// substitution function for dependency variant-ids. Supplied by the
    /// recipe/package-graph collaborator (out of scope here); the identity
    /// engine calls it once with the true variant-id of each dependency
    /// (yielding `variant_id` back) and once with each dependency's last
    /// *stored* variant-id (yielding the incremental variant-id).
    pub digest: Arc<dyn VariantDigest>,
}

/// Recomputes a step's variant-id from its recipe-level definition, given a
/// caller-supplied resolver for dependency variant-ids. The hashing of the
/// recipe graph itself is entirely owned by the external recipe collaborator.
pub trait VariantDigest: Send + Sync {
    fn compute(&self, resolve_dep_variant_id: &dyn Fn(&Step) -> Digest) -> Digest;
}

impl Step {
    pub fn is_checkout(&self) -> bool {
        matches!(self.kind, StepKind::Checkout)
    }

    pub fn is_build(&self) -> bool {
        matches!(self.kind, StepKind::Build)
    }

    pub fn is_package(&self) -> bool {
        matches!(self.kind, StepKind::Package)
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("kind", &self.kind)
            .field("variant_id", &self.variant_id)
            .field("workspace_path", &self.workspace_path)
            .finish_non_exhaustive()
    }
}
