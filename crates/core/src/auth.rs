// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Users, sessions and invitations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque token identifying one session of a user, handed out by
/// login. The username is recoverable from the token itself so that a
/// user record can be looked up without consulting an index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A short-lived token authorizing a single registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationToken(String);

impl InvitationToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvitationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An adaptive hash of a password. Never exposed through read models.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// The hash is deliberately kept out of debug output.
impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(***)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: AccessToken,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub password: PasswordHash,
    pub administrator: bool,
    pub created: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

/// A user as exposed to callers, without the password hash and with
/// sessions reduced to their activity timestamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadUser {
    pub username: String,
    pub administrator: bool,
    pub created: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<ReadSession>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadSession {
    pub last_seen: DateTime<Utc>,
}

impl From<&User> for ReadUser {
    fn from(user: &User) -> Self {
        let User {
            username,
            password: _,
            administrator,
            created,
            last_seen,
            sessions,
        } = user;
        Self {
            username: username.clone(),
            administrator: *administrator,
            created: *created,
            last_seen: *last_seen,
            sessions: sessions
                .iter()
                .map(|session| ReadSession {
                    last_seen: session.last_seen,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    #[serde(rename = "invitation")]
    pub token: InvitationToken,
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_user_omits_password_hash() {
        let now = Utc::now();
        let user = User {
            username: "ada".to_owned(),
            password: PasswordHash::new("$2b$12$abcdefghijklmnopqrstuv"),
            administrator: true,
            created: now,
            last_seen: now,
            sessions: vec![Session {
                token: AccessToken::new("deadbeef-616461"),
                last_seen: now,
            }],
        };

        let read_user = ReadUser::from(&user);
        let json = serde_json::to_string(&read_user).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("deadbeef"));
        assert_eq!(1, read_user.sessions.len());
    }
}
