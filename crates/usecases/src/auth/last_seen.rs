// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Write-behind updates of last-seen timestamps.
//!
//! Checking an access token happens on almost every request; writing a
//! timestamp to the database each time would turn every read into a
//! write transaction. Instead observations are coalesced in memory,
//! keeping the maximum per user and per session, and flushed
//! periodically by a background task.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use eggplant_core::auth::AccessToken;
use eggplant_repo::{RepoError, UserRepo as _};
use eggplant_repo_redb::TransactionProvider;

/// How often pending observations are written back.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default)]
struct UserUpdate {
    last_seen: Option<DateTime<Utc>>,
    sessions: HashMap<AccessToken, DateTime<Utc>>,
}

impl UserUpdate {
    fn observe(&mut self, token: &AccessToken, time: DateTime<Utc>) {
        if self.last_seen.map_or(true, |current| time > current) {
            self.last_seen = Some(time);
        }
        let session = self.sessions.entry(token.clone()).or_insert(time);
        if time > *session {
            *session = time;
        }
    }

    fn absorb(&mut self, other: UserUpdate) {
        if let Some(last_seen) = other.last_seen {
            if self.last_seen.map_or(true, |current| last_seen > current) {
                self.last_seen = Some(last_seen);
            }
        }
        for (token, time) in other.sessions {
            let session = self.sessions.entry(token).or_insert(time);
            if time > *session {
                *session = time;
            }
        }
    }
}

#[derive(Debug)]
pub struct LastSeenUpdater {
    provider: Arc<TransactionProvider>,
    updates: Mutex<HashMap<String, UserUpdate>>,
}

impl LastSeenUpdater {
    #[must_use]
    pub fn new(provider: Arc<TransactionProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            updates: Mutex::new(HashMap::new()),
        })
    }

    /// Records one observation. Never blocks on the database.
    pub fn update(&self, username: &str, token: &AccessToken, time: DateTime<Utc>) {
        let mut updates = self.updates.lock();
        updates
            .entry(username.to_owned())
            .or_default()
            .observe(token, time);
    }

    /// Flushes pending observations every `interval` until `shutdown`
    /// flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => return,
            }
            if let Err(err) = self.flush().await {
                log::error!("last seen updater error: {err:#}");
            }
        }
    }

    /// Takes the pending observations and merges them into the stored
    /// user records, only ever advancing timestamps. Unknown users are
    /// skipped. When the transaction fails the taken observations are
    /// merged back, so nothing is lost.
    pub async fn flush(&self) -> crate::Result<()> {
        let taken = std::mem::take(&mut *self.updates.lock());
        if taken.is_empty() {
            return Ok(());
        }

        let to_apply = taken.clone();
        let result = self
            .provider
            .write(move |repositories| {
                for (username, update) in &to_apply {
                    let mut user = match repositories.users.get(username) {
                        Ok(user) => user,
                        Err(RepoError::NotFound) => continue,
                        Err(err) => return Err(crate::Error::from(err)),
                    };

                    if let Some(last_seen) = update.last_seen {
                        if last_seen > user.last_seen {
                            user.last_seen = last_seen;
                        }
                    }
                    for session in &mut user.sessions {
                        if let Some(time) = update.sessions.get(&session.token) {
                            if *time > session.last_seen {
                                session.last_seen = *time;
                            }
                        }
                    }

                    repositories.users.put(&user)?;
                }
                Ok(())
            })
            .await;

        if result.is_err() {
            let mut updates = self.updates.lock();
            for (username, update) in taken {
                updates.entry(username).or_default().absorb(update);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observations_keep_the_maximum_per_session() {
        let token = AccessToken::new("t-61");
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(10);

        let mut update = UserUpdate::default();
        update.observe(&token, later);
        update.observe(&token, earlier);

        assert_eq!(Some(later), update.last_seen);
        assert_eq!(Some(&later), update.sessions.get(&token));
    }

    #[test]
    fn absorb_merges_maxima() {
        let token = AccessToken::new("t-61");
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(10);

        let mut pending = UserUpdate::default();
        pending.observe(&token, earlier);
        let mut taken = UserUpdate::default();
        taken.observe(&token, later);

        pending.absorb(taken);
        assert_eq!(Some(later), pending.last_seen);
        assert_eq!(Some(&later), pending.sessions.get(&token));
    }
}
