// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Context as _;
use redb::{ReadTransaction, WriteTransaction};

use eggplant_core::auth::User;
use eggplant_repo::{RepoError, RepoResult, UserRepo};

use crate::{backing::Backing, USERS};

#[derive(Debug)]
pub struct UserRepository<'txn> {
    table: Backing<'txn>,
}

impl<'txn> UserRepository<'txn> {
    pub(crate) fn read(txn: &ReadTransaction) -> RepoResult<Self> {
        Ok(Self {
            table: Backing::read(txn, USERS)?,
        })
    }

    pub(crate) fn write(txn: &'txn WriteTransaction) -> RepoResult<Self> {
        Ok(Self {
            table: Backing::write(txn, USERS)?,
        })
    }
}

impl UserRepo for UserRepository<'_> {
    fn put(&mut self, user: &User) -> RepoResult<()> {
        let json = serde_json::to_vec(user).context("marshaling to json failed")?;
        self.table.insert(&user.username, &json)
    }

    fn get(&self, username: &str) -> RepoResult<User> {
        let Some(json) = self.table.get(username)? else {
            return Err(RepoError::NotFound);
        };
        Ok(serde_json::from_slice(&json).context("json unmarshal failed")?)
    }

    fn remove(&mut self, username: &str) -> RepoResult<()> {
        self.table.remove(username)
    }

    fn list(&self) -> RepoResult<Vec<User>> {
        let mut users = Vec::new();
        for (_, json) in self.table.entries()? {
            users.push(serde_json::from_slice(&json).context("json unmarshal failed")?);
        }
        Ok(users)
    }

    fn count(&self) -> RepoResult<u64> {
        self.table.len()
    }
}
