// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

/// The run-scoped flags the scheduler itself interprets, as opposed to
/// `bob_exec::ExecConfig`'s per-step flags.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum number of steps cooked concurrently (`-j`/`--jobs`).
    pub jobs: usize,
    /// Collect every failure and keep going instead of cancelling the run
    /// on the first one (`--keep-going`).
    pub keep_going: bool,
    /// Only cook steps belonging to the root packages, skipping their
    /// dependencies entirely (`--no-deps`). A pure visibility filter: it
    /// does not change step identity or caching.
    pub skip_deps: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { jobs: 1, keep_going: false, skip_deps: false }
    }
}
