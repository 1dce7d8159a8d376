// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! The develop-mode directory oracle (C7): a stable, collision-free
//! mapping from `(recipe, variant-id)` to workspace directory that
//! survives recipe churn, backed by a tiny embedded database
//! (`spec.md §4.7`).

mod error;
mod key;
mod oracle;

#[cfg(test)]
#[path = "./develop_dirs_test.rs"]
mod develop_dirs_test;

pub use error::{Error, Result};
pub use key::DevelopDirKey;
pub use oracle::{DevelopDirOracle, ExternalDirPersister};
