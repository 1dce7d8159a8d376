// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bob_harness::{StdioMode, Verbosity};
use bob_identity::IdentityEngine;
use bob_state::StateStore;
use bob_step::{ArchiveHandle, AuditWriter, Step};
use regex::Regex;

use crate::download::DownloadMode;

/// Namespace-sandbox settings for steps that declare a sandbox dependency.
/// Mirrors the `[sandbox]` section of `bob-config`.
pub struct SandboxSettings {
    pub namespace_sandbox_bin: PathBuf,
    pub debug: bool,
}

/// The run-scoped flags the original CLI threads through every cook call
/// (`--force`, `--build-only`, `--clean-checkout`, ...).
pub struct ExecConfig {
    pub force: bool,
    pub build_only: bool,
    pub checkout_only: bool,
    pub clean_checkout: bool,
    pub clean_build: bool,
    /// Packages matching one of these never use a live-build-id prediction,
    /// even when the SCM and archive both support it.
    pub always_checkout: Vec<Regex>,
    pub verbosity: Verbosity,
    pub no_log_file: bool,
    pub env_whitelist: Vec<String>,
    pub preserve_env: bool,
    pub stdio: StdioMode,
    /// Tool-contributed `PATH`/`LD_LIBRARY_PATH` entries; the package-graph
    /// collaborator supplies these since `Step` itself does not model them.
    pub extra_paths: Vec<String>,
    pub library_paths: Vec<String>,
    pub sandbox: Option<SandboxSettings>,
    /// `--download`'s mode, resolved against archive reachability into the
    /// depth thresholds package steps compare themselves against.
    pub download_mode: DownloadMode,
    pub archive_reachable: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            force: false,
            build_only: false,
            checkout_only: false,
            clean_checkout: false,
            clean_build: false,
            always_checkout: Vec::new(),
            verbosity: Verbosity::Normal,
            no_log_file: false,
            env_whitelist: Vec::new(),
            preserve_env: false,
            stdio: StdioMode::Regular,
            extra_paths: Vec::new(),
            library_paths: Vec::new(),
            sandbox: None,
            download_mode: DownloadMode::No,
            archive_reachable: false,
        }
    }
}

impl ExecConfig {
    pub fn is_always_checkout(&self, package_name: &str) -> bool {
        self.always_checkout.iter().any(|pat| pat.is_match(package_name))
    }
}

/// Everything a checkout/build/package executor needs to run one step.
/// Owned by the scheduler (C6); one instance per build run.
pub struct ExecContext<'a> {
    pub state: &'a StateStore,
    pub identity: &'a IdentityEngine,
    pub archive: Arc<dyn ArchiveHandle>,
    pub audit: Arc<dyn AuditWriter>,
    /// Directory every `workspace_path` is resolved relative to.
    pub project_root: &'a Path,
    pub config: &'a ExecConfig,
}

impl<'a> ExecContext<'a> {
    /// The absolute on-disk directory of a step's workspace.
    pub fn abs_path(&self, step: &Step) -> PathBuf {
        self.project_root.join(step.workspace_path.as_str())
    }

    /// The absolute directory housing a workspace's sibling files
    /// (`audit.json.gz`, `cache.bin`, `attic/`, `deps/`).
    pub fn workspace_parent(&self, step: &Step) -> PathBuf {
        let path = self.abs_path(step);
        path.parent().map(Path::to_path_buf).unwrap_or(path)
    }
}
