// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use serde::Serialize;

use eggplant_repo::UserRepo as _;
use eggplant_repo_redb::TransactionProvider;
use eggplant_store::{tracks::TrackStore, Store, StoreStats};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub users: u64,
    pub tracks: StoreStats,
    pub thumbnails: StoreStats,
}

#[derive(Debug)]
pub struct Stats {
    provider: Arc<TransactionProvider>,
    track_store: Arc<TrackStore>,
    thumbnail_store: Arc<Store>,
}

impl Stats {
    #[must_use]
    pub fn new(
        provider: Arc<TransactionProvider>,
        track_store: Arc<TrackStore>,
        thumbnail_store: Arc<Store>,
    ) -> Self {
        Self {
            provider,
            track_store,
            thumbnail_store,
        }
    }

    pub async fn get(&self) -> Result<StatsReport> {
        let users = self
            .provider
            .read(|repositories| repositories.users.count().map_err(Error::from))
            .await?;
        let tracks = self
            .track_store
            .get_stats()
            .await
            .map_err(|err| Error::Other(err.context("could not get the track stats")))?;
        let thumbnails = self
            .thumbnail_store
            .get_stats()
            .await
            .map_err(|err| Error::Other(err.context("could not get the thumbnail stats")))?;
        Ok(StatsReport {
            users,
            tracks,
            thumbnails,
        })
    }
}
