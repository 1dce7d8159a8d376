// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! The identity engine (C2): variant-ids, incremental variant-ids and
//! build-ids for steps, plus the live-build-id protocol used to predict a
//! checkout step's build-id without performing the checkout.
//!
//! Recipe parsing and the hashing of a step's own definition are entirely
//! out of scope here -- they are supplied through `bob_step::Step::digest`.
//! This crate only resolves *dependency* identities and owns the caches and
//! protocol logic layered on top.

mod engine;
mod error;


pub use engine::IdentityEngine;
pub use error::{Error, Result};
