// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bob_config::Config;
use bob_exec::{ExecConfig, ExecContext, SandboxSettings};
use bob_identity::IdentityEngine;
use bob_scheduler::{PackageGraph, Scheduler, SchedulerConfig, TaskOutcome};
use bob_state::StateStore;
use bob_step::{ArchiveHandle, AuditWriter, Step};

use crate::error::{infra, Result};

/// Everything one `cook()` invocation needs, gathered behind the facade so
/// a frontend only has to build this once: the elaborated step roots, the
/// package-graph and collaborator traits, and the run-scoped flags that
/// don't come from `bob.toml`.
pub struct BuildRequest<'a> {
    pub project_root: &'a Path,
    pub roots: Vec<Arc<Step>>,
    pub graph: &'a dyn PackageGraph,
    pub archive: Arc<dyn ArchiveHandle>,
    pub audit: Arc<dyn AuditWriter>,
    pub exec: ExecConfig,
    pub scheduler: SchedulerConfig,
}

/// Wires a loaded [`Config`] into the per-run [`ExecConfig`]/[`SchedulerConfig`]
/// defaults, the way the original CLI's option parsing layers flags over
/// `bob.toml`. A frontend still owns translating its own flags (`--force`,
/// `--jobs`, ...) on top of whatever this returns.
pub struct BuildCore {
    config: Arc<Config>,
}

impl BuildCore {
    /// Load the current layered configuration (`/etc/bob.toml`, user,
    /// project, `BOB_*` env overrides) and wire it into a facade instance.
    pub fn load() -> Result<Self> {
        Ok(Self { config: Config::current().map_err(infra)? })
    }

    pub fn from_config(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A [`SchedulerConfig`] seeded from `[jobs]`, with `--jobs`/
    /// `--keep-going`/`--no-deps` overridden by whatever the frontend
    /// actually parsed.
    pub fn scheduler_config(&self, jobs: Option<usize>, keep_going: bool, skip_deps: bool) -> SchedulerConfig {
        SchedulerConfig {
            jobs: jobs.unwrap_or(self.config.jobs.default_count).max(1),
            keep_going,
            skip_deps,
        }
    }

    /// Sandbox settings seeded from `[sandbox]`, for steps that declare a
    /// sandbox dependency.
    pub fn sandbox_settings(&self, debug: bool) -> SandboxSettings {
        SandboxSettings { namespace_sandbox_bin: PathBuf::from(&self.config.sandbox.binary), debug }
    }

    /// An [`ExecConfig`] seeded from `[jobs]`'s buffered-io default,
    /// everything else left at its own default until the frontend
    /// overrides it.
    pub fn exec_config(&self) -> ExecConfig {
        ExecConfig {
            stdio: if self.config.jobs.force_buffered_io {
                bob_harness::StdioMode::Buffered
            } else {
                bob_harness::StdioMode::Regular
            },
            ..ExecConfig::default()
        }
    }
}

/// Open the persistent state store, build an identity engine over it, and
/// cook `request.roots` (and, unless `--no-deps` is set, their full
/// dependency closure). This is the one call a frontend needs once it has
/// elaborated a package graph into `Step`s: everything below it (C1-C6) is
/// wired together here.
pub async fn cook(request: BuildRequest<'_>) -> Result<TaskOutcome> {
    let state = Arc::new(StateStore::open(request.project_root).map_err(infra)?);
    let identity = IdentityEngine::new(state.clone(), request.archive.clone());
    let ctx = ExecContext {
        state: state.as_ref(),
        identity: &identity,
        archive: request.archive,
        audit: request.audit,
        project_root: request.project_root,
        config: &request.exec,
    };
    let scheduler = Scheduler::new(ctx, request.graph, request.scheduler, &state)?;
    let checkout_only = request.exec.checkout_only;
    scheduler.cook(&request.roots, checkout_only).await
}
