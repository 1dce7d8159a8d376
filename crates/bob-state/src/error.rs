// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("state store error")]
    Sled(#[from] sled::Error),
    #[error("corrupt state store entry")]
    Decode(#[from] Box<bincode::ErrorKind>),
    #[error("state store transaction failed: {0}")]
    Transaction(String),
}
