// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use bob_error::{BobError, Error};

/// Map a lower-layer infrastructure error (state store, identity engine)
/// onto the core's `Error::Bob` variant -- these are never expected
/// failures, so they are never `BuildError`.
pub(crate) fn infra(err: impl std::fmt::Display) -> Error {
    Error::Bob(BobError(err.to_string()))
}
