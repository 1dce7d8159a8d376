// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("develop-dir database error")]
    Sqlite(#[from] rusqlite::Error),
    #[error("develop directory for {0} missing after refresh")]
    Missing(String),
}
