// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! Content digests used throughout the build core.
//!
//! A [`Digest`] identifies the content of a step definition (variant-id), the
//! content of a workspace (result hash), or the content-addressed identity an
//! archive uses to look up a prebuilt artifact (build-id). All three share
//! the same 20-byte shape and hex-encoded textual form.

mod error;
mod hash;

pub use error::{Error, Result};
pub use hash::{parse_digest, Digest, Hasher, DIGEST_SIZE, NULL_DIGEST};
