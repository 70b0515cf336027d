// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Interfaces of the persistent repositories.
//!
//! Repositories operate inside a transaction owned by the caller; the
//! storage crate provides the transaction shapes and hands out a bundle
//! of repositories bound to the active transaction.

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]

use thiserror::Error;

use eggplant_core::auth::{Invitation, InvitationToken, User};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

pub trait UserRepo {
    /// Inserts the user. A previous entry with this username is
    /// overwritten.
    fn put(&mut self, user: &User) -> RepoResult<()>;

    /// Returns the user with the given username or `NotFound`.
    fn get(&self, username: &str) -> RepoResult<User>;

    /// Removes a user. Removing a missing user is not an error.
    fn remove(&mut self, username: &str) -> RepoResult<()>;

    fn list(&self) -> RepoResult<Vec<User>>;

    fn count(&self) -> RepoResult<u64>;
}

pub trait InvitationRepo {
    /// Inserts the invitation. Expired invitations are garbage-collected
    /// on the way.
    fn put(&mut self, invitation: &Invitation) -> RepoResult<()>;

    /// Returns the invitation with the given token. Invitations past
    /// their maximum age are reported as `NotFound`.
    fn get(&self, token: &InvitationToken) -> RepoResult<Invitation>;

    /// Removes an invitation. Removing a missing invitation is not an
    /// error.
    fn remove(&mut self, token: &InvitationToken) -> RepoResult<()>;
}
