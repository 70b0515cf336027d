// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence on top of an embedded redb key-value database.
//!
//! Entities are stored as JSON values under their natural key in one
//! table per entity kind. Transactions are provided by
//! [`provider::TransactionProvider`], which coalesces concurrent write
//! transactions into batches.

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

use std::{
    path::Path,
    time::{Duration, Instant},
};

use anyhow::Context as _;
use redb::{Database, DatabaseError, ReadTransaction, TableDefinition, WriteTransaction};

use eggplant_repo::RepoResult;

mod backing;
mod invitations;
mod provider;
mod users;

pub use self::{
    invitations::InvitationRepository, provider::TransactionProvider, users::UserRepository,
};

pub(crate) const USERS: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("users");

pub(crate) const INVITATIONS: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("invitations");

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Opens or creates the database file. While another instance holds the
/// exclusive lock the open is retried for a few seconds before giving
/// up.
pub fn open_database(path: &Path) -> anyhow::Result<Database> {
    let deadline = Instant::now() + OPEN_TIMEOUT;
    loop {
        match Database::create(path) {
            Ok(database) => return Ok(database),
            Err(DatabaseError::DatabaseAlreadyOpen) => {
                if Instant::now() >= deadline {
                    anyhow::bail!(
                        "error opening the database (the database file is locked in \
                         exclusive mode, is another instance of the program running?)"
                    );
                }
                std::thread::sleep(OPEN_RETRY_DELAY);
            }
            Err(err) => return Err(err).context("error opening the database"),
        }
    }
}

/// The repositories bound to one active transaction.
#[derive(Debug)]
pub struct Repositories<'txn> {
    pub users: UserRepository<'txn>,
    pub invitations: InvitationRepository<'txn>,
}

impl<'txn> Repositories<'txn> {
    pub(crate) fn read(txn: &ReadTransaction) -> RepoResult<Self> {
        Ok(Self {
            users: UserRepository::read(txn)?,
            invitations: InvitationRepository::read(txn)?,
        })
    }

    pub(crate) fn write(txn: &'txn WriteTransaction) -> RepoResult<Self> {
        Ok(Self {
            users: UserRepository::write(txn)?,
            invitations: InvitationRepository::write(txn)?,
        })
    }
}
