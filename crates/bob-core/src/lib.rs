// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! The execution core of a recipe-driven, content-addressed build tool,
//! re-exported behind one dependency (`spec.md §1-2`).
//!
//! A frontend (CLI, TUI, or anything else that can elaborate a package
//! graph into [`Step`]s) depends on this crate alone. It is expected to
//! supply the collaborator traits this crate consumes --
//! [`ScmHandle`]/[`ArchiveHandle`]/[`AuditWriter`]/[`PackageGraph`] -- and
//! to call [`cook`] once it has a set of root steps to build.
//!
//! Recipe parsing, package-graph generation, SCM plugins, the remote
//! archive, audit-record rendering, and any CLI/TUI surface remain
//! entirely out of scope; this crate only schedules and executes steps.

mod error;
mod run;

#[cfg(test)]
mod core_test;

pub use error::{BobError, BuildError, Error, MultiBobError, ParseError, Result};
pub use run::{cook, BuildCore, BuildRequest};

pub use bob_config::Config;
pub use bob_digest::{parse_digest, Digest, Hasher, DIGEST_SIZE, NULL_DIGEST};
pub use bob_develop_dirs::{DevelopDirKey, DevelopDirOracle, ExternalDirPersister};
pub use bob_exec::{
    cook_build_step, cook_checkout_step, cook_package_step, resolve_checkout_build_id, CheckoutOutcome,
    DownloadMode, ExecConfig, ExecContext, SandboxSettings,
};
pub use bob_harness::{compose_scripts, run_shell, write_scripts, ComposedScript, RunOutcome, RunRequest, SandboxPlan, StdioMode, Verbosity};
pub use bob_identity::IdentityEngine;
pub use bob_scheduler::{PackageGraph, Scheduler, SchedulerConfig, TaskOutcome};
pub use bob_state::{BuildState, DirectoryState, InputHashes, ResultHash, StateStore};
pub use bob_step::{
    ArchiveHandle, AuditFacts, AuditSpec, AuditWriter, Dependencies, DummyArchive, SandboxMount, ScmHandle, ScmStatus,
    Step, StepKind, VariantDigest,
};
pub use bob_workspace::{atticize, construct_dir, empty_directory, hash_workspace, link_dependencies, remove_path};
