// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Queries against the music collection.

use std::sync::Arc;

use eggplant_core::music::{Album, AlbumId, SearchResult};
use eggplant_library::Library;
use eggplant_store::{tracks::TrackStore, ConvertedFile, Store};

use crate::{Error, Result};

const MAX_QUERY_LEN: usize = 100;

#[derive(Debug)]
pub struct Music {
    library: Arc<Library>,
    track_store: Arc<TrackStore>,
    thumbnail_store: Arc<Store>,
}

impl Music {
    #[must_use]
    pub fn new(
        library: Arc<Library>,
        track_store: Arc<TrackStore>,
        thumbnail_store: Arc<Store>,
    ) -> Self {
        Self {
            library,
            track_store,
            thumbnail_store,
        }
    }

    /// Lists an album; an empty id path lists the root.
    pub async fn browse(&self, ids: &[AlbumId], public_only: bool) -> Result<Album> {
        let mut album = self.library.browse(ids, public_only)?;
        for track in &mut album.tracks {
            track.duration = self.track_store.duration(track.file_id.as_str()).await;
        }
        Ok(album)
    }

    /// Finds albums and tracks by a case-insensitive title substring.
    pub async fn search(&self, query: &str, public_only: bool) -> Result<SearchResult> {
        if query.is_empty() {
            return Err(Error::InvalidParameters("query can't be empty".into()));
        }
        if query.len() > MAX_QUERY_LEN {
            return Err(Error::InvalidParameters(format!(
                "query can't be longer than {MAX_QUERY_LEN} characters"
            )));
        }

        let mut result = self.library.search(query, public_only);
        for found in &mut result.tracks {
            found.track.duration = self
                .track_store
                .duration(found.track.file_id.as_str())
                .await;
        }
        Ok(result)
    }

    /// A handle onto the converted track with the given file id.
    pub async fn track(&self, id: &str) -> Result<ConvertedFile> {
        Ok(self.track_store.get_converted_file(id).await?)
    }

    /// A handle onto the converted thumbnail with the given file id.
    pub async fn thumbnail(&self, id: &str) -> Result<ConvertedFile> {
        Ok(self.thumbnail_store.get_converted_file(id).await?)
    }
}
