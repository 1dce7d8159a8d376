// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

/// What a `cook` run ended in. `bob_error::Error` deliberately has no
/// `Cancel`/`Restart` variants (see that crate's module docs) -- they are
/// control signals, not failures, and live here instead.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// Every requested step was cooked, with no mispredict restart along
    /// the way.
    Done,
    /// The run was cancelled (an error under non-`keep_going`, or a
    /// user-requested interrupt) before every step was cooked.
    Cancelled,
    /// A checkout step's live-build-id prediction turned out wrong at
    /// least once; the scheduler restarted from the same roots and this
    /// retried pass completed successfully.
    Restart,
}
