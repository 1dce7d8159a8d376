// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! Per-step checkout/build/package state machine. Each function here cooks
//! exactly one step, assuming its dependencies have already been cooked;
//! dependency-first traversal, concurrency and the mispredict-restart outer
//! loop belong to the scheduler.

mod audit;
mod build;
mod checkout;
mod context;
mod download;
mod error;
mod package;
mod run;


pub use build::cook_build_step;
pub use checkout::{cook_checkout_step, resolve_checkout_build_id, CheckoutOutcome};
pub use context::{ExecConfig, ExecContext, SandboxSettings};
pub use download::DownloadMode;
pub use package::cook_package_step;
