// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

/// The CLI's `--download` mode, resolved into the `(depth, force_depth)`
/// thresholds a package step compares its own depth against
/// (`spec.md §4.5.4`). Roots are depth 0; `--with-provided` packages are
/// requested at depth 1.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DownloadMode {
    No,
    Yes,
    Forced,
    Deps,
    ForcedDeps,
    ForcedFallback,
}

impl DownloadMode {
    /// `(download_depth, download_depth_force)`: a package step may
    /// download when `depth >= download_depth`, and must (erroring on
    /// failure) when `depth >= download_depth_force`.
    pub fn depths(self, archive_reachable: bool) -> (u32, u32) {
        match self {
            DownloadMode::No => (u32::MAX, u32::MAX),
            DownloadMode::Yes => (if archive_reachable { 0 } else { u32::MAX }, u32::MAX),
            DownloadMode::Forced => (0, 0),
            DownloadMode::Deps => (if archive_reachable { 1 } else { u32::MAX }, u32::MAX),
            DownloadMode::ForcedDeps => (1, 1),
            DownloadMode::ForcedFallback => (0, 1),
        }
    }
}
