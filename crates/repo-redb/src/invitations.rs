// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Context as _;
use chrono::Utc;
use redb::{ReadTransaction, WriteTransaction};

use eggplant_core::auth::{Invitation, InvitationToken};
use eggplant_repo::{InvitationRepo, RepoError, RepoResult};

use crate::{backing::Backing, INVITATIONS};

const MAX_INVITATION_AGE_HOURS: i64 = 48;

fn max_invitation_age() -> chrono::Duration {
    chrono::Duration::hours(MAX_INVITATION_AGE_HOURS)
}

fn is_expired(invitation: &Invitation) -> bool {
    Utc::now() > invitation.created + max_invitation_age()
}

#[derive(Debug)]
pub struct InvitationRepository<'txn> {
    table: Backing<'txn>,
}

impl<'txn> InvitationRepository<'txn> {
    pub(crate) fn read(txn: &ReadTransaction) -> RepoResult<Self> {
        Ok(Self {
            table: Backing::read(txn, INVITATIONS)?,
        })
    }

    pub(crate) fn write(txn: &'txn WriteTransaction) -> RepoResult<Self> {
        Ok(Self {
            table: Backing::write(txn, INVITATIONS)?,
        })
    }

    fn remove_expired(&mut self) -> RepoResult<()> {
        let mut stale = Vec::new();
        for (token, json) in self.table.entries()? {
            let invitation: Invitation =
                serde_json::from_slice(&json).context("json unmarshal failed")?;
            if is_expired(&invitation) {
                stale.push(token);
            }
        }
        for token in stale {
            self.table.remove(&token)?;
        }
        Ok(())
    }
}

impl InvitationRepo for InvitationRepository<'_> {
    fn put(&mut self, invitation: &Invitation) -> RepoResult<()> {
        let json = serde_json::to_vec(invitation).context("marshaling to json failed")?;
        self.remove_expired()
            .context("could not remove expired invitations")
            .map_err(RepoError::Other)?;
        self.table.insert(invitation.token.as_str(), &json)
    }

    fn get(&self, token: &InvitationToken) -> RepoResult<Invitation> {
        let Some(json) = self.table.get(token.as_str())? else {
            return Err(RepoError::NotFound);
        };
        let invitation: Invitation =
            serde_json::from_slice(&json).context("json unmarshal failed")?;
        if is_expired(&invitation) {
            return Err(RepoError::NotFound);
        }
        Ok(invitation)
    }

    fn remove(&mut self, token: &InvitationToken) -> RepoResult<()> {
        self.table.remove(token.as_str())
    }
}
