// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Account management: registration, sessions and invitations.
//!
//! Every operation runs its checks and mutations inside a single
//! transaction, so concurrent requests cannot interleave between a
//! check and the write it guards.

use std::sync::Arc;

use chrono::Utc;

use eggplant_core::auth::{
    AccessToken, Invitation, InvitationToken, ReadUser, Session, User,
};
use eggplant_repo::{InvitationRepo as _, RepoError, UserRepo as _};
use eggplant_repo_redb::TransactionProvider;

use crate::{Error, Result};

mod last_seen;
mod password;
mod token;

pub use self::{
    last_seen::{LastSeenUpdater, DEFAULT_FLUSH_INTERVAL},
    password::PasswordHasher,
    token::{crypto_string, AccessTokenCodec},
};

const MAX_USERNAME_LEN: usize = 100;
const MAX_PASSWORD_LEN: usize = 10_000;

const INVITATION_TOKEN_BYTES: usize = 256 / 8;

fn validate(username: &str, password: &str) -> Result<()> {
    if username.is_empty() {
        return Err(Error::InvalidParameters("username can't be empty".into()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(Error::InvalidParameters(format!(
            "username length can't exceed {MAX_USERNAME_LEN} characters"
        )));
    }
    if password.is_empty() {
        return Err(Error::InvalidParameters("password can't be empty".into()));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(Error::InvalidParameters(format!(
            "password length can't exceed {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct Auth {
    provider: Arc<TransactionProvider>,
    password_hasher: PasswordHasher,
    token_codec: AccessTokenCodec,
    last_seen: Arc<LastSeenUpdater>,
}

impl Auth {
    #[must_use]
    pub fn new(
        provider: Arc<TransactionProvider>,
        password_hasher: PasswordHasher,
        last_seen: Arc<LastSeenUpdater>,
    ) -> Self {
        Self {
            provider,
            password_hasher,
            token_codec: AccessTokenCodec,
            last_seen,
        }
    }

    /// Creates the very first user as an administrator. Fails once any
    /// user exists.
    pub async fn register_initial(&self, username: &str, password: &str) -> Result<()> {
        validate(username, password)?;
        let user = self.new_user(username, password, true).await?;

        self.provider
            .write(move |repositories| {
                if repositories.users.count()? != 0 {
                    return Err(Error::InvalidParameters("there are existing users".into()));
                }
                repositories.users.put(&user)?;
                Ok(())
            })
            .await
    }

    /// Consumes the invitation and creates a non-administrator user.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        invitation_token: &InvitationToken,
    ) -> Result<()> {
        validate(username, password)?;
        let user = self.new_user(username, password, false).await?;
        let invitation_token = invitation_token.clone();

        self.provider
            .write(move |repositories| {
                repositories.invitations.get(&invitation_token)?;
                repositories.invitations.remove(&invitation_token)?;
                match repositories.users.get(&user.username) {
                    Ok(_) => Err(Error::UsernameTaken),
                    Err(RepoError::NotFound) => {
                        repositories.users.put(&user)?;
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    /// Verifies the credentials and opens a new session. Every failure
    /// mode is reported as `Unauthorized` to keep probing uninformative.
    pub async fn login(&self, username: &str, password: &str) -> Result<AccessToken> {
        validate(username, password).map_err(|_| Error::Unauthorized)?;

        let token = self.token_codec.generate(username)?;
        let session = Session {
            token: token.clone(),
            last_seen: Utc::now(),
        };
        let username = username.to_owned();
        let password = password.to_owned();
        let password_hasher = self.password_hasher.clone();

        self.provider
            .write(move |repositories| {
                let mut user = match repositories.users.get(&username) {
                    Ok(user) => user,
                    Err(RepoError::NotFound) => return Err(Error::Unauthorized),
                    Err(err) => return Err(err.into()),
                };
                if !password_hasher.verify(&user.password, &password) {
                    return Err(Error::Unauthorized);
                }
                user.sessions.push(session.clone());
                repositories.users.put(&user)?;
                Ok(())
            })
            .await?;

        Ok(token)
    }

    /// Resolves the token to its user, verifies the session still
    /// exists and feeds the observation to the last-seen updater.
    pub async fn check_access_token(&self, token: &AccessToken) -> Result<ReadUser> {
        let username = self
            .token_codec
            .username(token)
            .map_err(|_| Error::Unauthorized)?;

        let token_to_find = token.clone();
        let user: User = self
            .provider
            .read(move |repositories| {
                let user = match repositories.users.get(&username) {
                    Ok(user) => user,
                    Err(RepoError::NotFound) => return Err(Error::Unauthorized),
                    Err(err) => return Err(err.into()),
                };
                if !user
                    .sessions
                    .iter()
                    .any(|session| session.token == token_to_find)
                {
                    return Err(Error::Unauthorized);
                }
                Ok(user)
            })
            .await?;

        self.last_seen.update(&user.username, token, Utc::now());
        Ok(ReadUser::from(&user))
    }

    /// Drops the session identified by the token. A missing user or
    /// session is a hard error, not a silent no-op.
    pub async fn logout(&self, token: &AccessToken) -> Result<()> {
        let username = self
            .token_codec
            .username(token)
            .map_err(|err| Error::Other(err.context("could not extract the username")))?;
        let token = token.clone();

        self.provider
            .write(move |repositories| {
                let mut user = repositories.users.get(&username)?;
                let session_count = user.sessions.len();
                user.sessions.retain(|session| session.token != token);
                if user.sessions.len() == session_count {
                    return Err(Error::Other(anyhow::anyhow!("session not found")));
                }
                repositories.users.put(&user)?;
                Ok(())
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<ReadUser>> {
        let users = self
            .provider
            .read(|repositories| repositories.users.list().map_err(Error::from))
            .await?;
        Ok(users.iter().map(ReadUser::from).collect())
    }

    /// Creates an invitation that authorizes one registration.
    pub async fn create_invitation(&self) -> Result<InvitationToken> {
        let token = InvitationToken::new(crypto_string(INVITATION_TOKEN_BYTES)?);
        let invitation = Invitation {
            token: token.clone(),
            created: Utc::now(),
        };

        self.provider
            .write(move |repositories| {
                match repositories.invitations.get(&invitation.token) {
                    // A collision would mean 256 bits of randomness
                    // repeated themselves.
                    Ok(_) => Err(Error::Conflict),
                    Err(RepoError::NotFound) => {
                        repositories.invitations.put(&invitation)?;
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await?;

        Ok(token)
    }

    pub async fn remove(&self, username: &str) -> Result<()> {
        let username = username.to_owned();
        self.provider
            .write(move |repositories| repositories.users.remove(&username).map_err(Error::from))
            .await
    }

    pub async fn set_password(&self, username: &str, password: &str) -> Result<()> {
        validate(username, password)?;
        let password_hash = self.hash_password(password).await?;
        let username = username.to_owned();

        self.provider
            .write(move |repositories| {
                let mut user = repositories.users.get(&username)?;
                user.password = password_hash.clone();
                repositories.users.put(&user)?;
                Ok(())
            })
            .await
    }

    async fn new_user(&self, username: &str, password: &str, administrator: bool) -> Result<User> {
        let now = Utc::now();
        Ok(User {
            username: username.to_owned(),
            password: self.hash_password(password).await?,
            administrator,
            created: now,
            last_seen: now,
            sessions: vec![],
        })
    }

    async fn hash_password(&self, password: &str) -> Result<eggplant_core::auth::PasswordHash> {
        let password_hasher = self.password_hasher.clone();
        let password = password.to_owned();
        // An adaptive hash takes a deliberately long time, keep it off
        // the async threads.
        tokio::task::spawn_blocking(move || password_hasher.hash(&password))
            .await
            .map_err(|err| Error::Other(anyhow::Error::new(err)))?
            .map_err(Error::Other)
    }
}
