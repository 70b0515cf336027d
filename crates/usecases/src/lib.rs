// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Application use cases on top of the library, the conversion stores
//! and the persistent repositories.

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

use anyhow::Context as _;
use thiserror::Error;

use eggplant_repo::RepoError;

pub mod auth;
pub mod music;
pub mod stats;

/// How callers are expected to react to a failed operation. Sentinel
/// kinds stay identifiable through every layer; everything else is an
/// internal error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("username taken")]
    UsernameTaken,

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("conflict")]
    Conflict,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<RepoError> for Error {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::NotFound,
            RepoError::Other(err) => Self::Other(err.context("transaction failed")),
        }
    }
}

impl From<eggplant_library::Error> for Error {
    fn from(err: eggplant_library::Error) -> Self {
        match err {
            eggplant_library::Error::NotFound => Self::NotFound,
            eggplant_library::Error::Forbidden => Self::Forbidden,
        }
    }
}

impl From<eggplant_store::Error> for Error {
    fn from(err: eggplant_store::Error) -> Self {
        match err {
            eggplant_store::Error::NotFound => Self::NotFound,
            other => Self::Other(anyhow::Error::new(other).context("store error")),
        }
    }
}

#[cfg(test)]
mod tests;
