// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

pub use bob_error::{BobError, BuildError, Error, MultiBobError, ParseError, Result};

/// Map a lower-layer infrastructure error (config loading, state store)
/// onto `Error::Bob`, the same convention every other crate in the
/// workspace uses at its own boundary.
pub(crate) fn infra(err: impl std::fmt::Display) -> Error {
    Error::Bob(BobError(err.to_string()))
}
