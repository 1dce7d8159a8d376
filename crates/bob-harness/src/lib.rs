// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! The script harness (C4): composes the prolog+body script and the
//! run/shell wrapper for a step, then executes the wrapper with either
//! regular (inherited) or buffered stdio, and an optional sandbox.

mod exec;
mod script;

#[cfg(test)]
mod harness_test;

pub use exec::{run_shell, RunOutcome, StdioMode};
pub use script::{compose_scripts, write_scripts, ComposedScript, RunRequest, SandboxPlan, Verbosity};
