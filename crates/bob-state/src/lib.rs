// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! The persistent state store (C1): a single-process, single-writer
//! embedded key-value store recording per-workspace identity and the
//! global maps the rest of the core relies on for incrementality.

mod error;
mod model;
mod store;


pub use error::{Error, Result};
pub use model::{BuildState, DirectoryState, InputHashes, ResultHash};
pub use store::StateStore;
