// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

/// A specialized result for digest operations
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by digest operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A digest could not be decoded from a string because it contained
    /// invalid hex data
    #[error("could not decode digest: {0}")]
    DigestDecodeError(#[source] hex::FromHexError),

    /// A digest could not be created because the wrong number of bytes
    /// were provided
    #[error("invalid number of bytes for digest: {0} != {}", super::DIGEST_SIZE)]
    DigestLengthError(usize),
}
