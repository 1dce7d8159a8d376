// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use bob_error::{BobError, Error};

/// Map a lower-layer infrastructure error (state store) onto the core's
/// `Error::Bob` variant, the same convention `bob_exec` uses.
pub(crate) fn infra(err: impl std::fmt::Display) -> Error {
    Error::Bob(BobError(err.to_string()))
}
