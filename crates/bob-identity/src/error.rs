// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    State(#[from] bob_state::Error),

    /// A non-checkout step's build-id was requested before the build-id of
    /// one of its (checkout) dependencies had been recorded. The caller must
    /// cook every dependency before asking for a step's build-id.
    #[error("build-id of '{0}' was requested before it was cooked")]
    UncookedDependency(String),
}
