// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The canonical, navigable representation of the music collection.
//!
//! The library consumes album tree snapshots from the scanner,
//! translates them into identified nodes, publishes the resulting track
//! and thumbnail item sets to the conversion stores and answers browse
//! and search queries against the most recent tree. The tree is replaced
//! wholesale on every update; readers never observe a half-built tree.

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context as _;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use eggplant_core::{
    music::{
        Access, Album, AlbumId, BasicAlbum, FileId, SearchResult, SearchResultTrack, Thumbnail,
        Track, TrackId,
    },
    util::natsort,
};
use eggplant_media::{access, digest, scanner};
use eggplant_store::{tracks::TrackStore, Item, Store};

const ROOT_ALBUM_TITLE: &str = "Eggplant";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
struct TrackNode {
    title: String,
    path: PathBuf,
    file_id: FileId,
}

#[derive(Debug)]
struct AlbumNode {
    title: String,
    thumbnail_path: Option<PathBuf>,
    thumbnail_id: Option<FileId>,
    access: Option<Access>,
    albums: HashMap<AlbumId, AlbumNode>,
    tracks: HashMap<TrackId, TrackNode>,
}

impl AlbumNode {
    fn new(title: String) -> Self {
        Self {
            title,
            thumbnail_path: None,
            thumbnail_id: None,
            access: None,
            albums: HashMap::new(),
            tracks: HashMap::new(),
        }
    }

    fn thumbnail(&self) -> Option<Thumbnail> {
        self.thumbnail_id
            .clone()
            .map(|file_id| Thumbnail { file_id })
    }
}

/// Receives scanner updates, dispatches the derived item sets to the
/// stores and answers queries against the resulting album tree.
#[derive(Debug)]
pub struct Library {
    root: Mutex<AlbumNode>,
    track_store: Arc<TrackStore>,
    thumbnail_store: Arc<Store>,
}

impl Library {
    /// Creates a library fed by the given snapshot channel. The
    /// subscriber task ends when the channel closes.
    pub fn new(
        mut snapshots: mpsc::Receiver<scanner::Album>,
        track_store: Arc<TrackStore>,
        thumbnail_store: Arc<Store>,
    ) -> Arc<Self> {
        let library = Arc::new(Self {
            root: Mutex::new(AlbumNode::new(ROOT_ALBUM_TITLE.to_owned())),
            track_store,
            thumbnail_store,
        });

        tokio::spawn({
            let library = Arc::clone(&library);
            async move {
                while let Some(snapshot) = snapshots.recv().await {
                    let library = Arc::clone(&library);
                    // Translating a snapshot stats every file, keep that
                    // off the async threads.
                    let applied =
                        tokio::task::spawn_blocking(move || library.apply_snapshot(&snapshot))
                            .await;
                    match applied {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            log::error!("could not handle a scanner update: {err:#}");
                        }
                        Err(err) => log::error!("scanner update task failed: {err}"),
                    }
                }
            }
        });

        library
    }

    /// Builds a fresh tree from the snapshot, publishes the item sets
    /// and atomically replaces the current tree.
    fn apply_snapshot(&self, snapshot: &scanner::Album) -> anyhow::Result<()> {
        let mut root = AlbumNode::new(ROOT_ALBUM_TITLE.to_owned());
        merge_album(&mut root, snapshot).context("merge album failed")?;

        let mut tracks = Vec::new();
        collect_tracks(&root, &mut tracks);
        self.track_store.set_items(tracks);

        let mut thumbnails = Vec::new();
        collect_thumbnails(&root, &mut thumbnails);
        self.thumbnail_store.set_items(thumbnails);

        *self.root.lock() = root;
        Ok(())
    }

    /// Lists the album addressed by `ids`; an empty path addresses the
    /// root. With `public_only` the listing is restricted to what an
    /// anonymous visitor may see.
    pub fn browse(&self, ids: &[AlbumId], public_only: bool) -> Result<Album> {
        let root = self.root.lock();

        let mut current = &*root;
        let mut effective_access = current.access;
        let mut parents = Vec::new();
        for id in ids {
            current = current.albums.get(id).ok_or(Error::NotFound)?;
            if let Some(access) = current.access {
                effective_access = Some(access);
            }
            parents.push(Album {
                id: Some(id.clone()),
                title: current.title.clone(),
                ..Album::default()
            });
        }

        let include_all = !public_only || effective_access.unwrap_or_default().public;

        let mut listed = Album {
            id: ids.last().cloned(),
            title: current.title.clone(),
            thumbnail: current.thumbnail(),
            access: current.access.unwrap_or_default(),
            parents,
            albums: Vec::new(),
            tracks: Vec::new(),
        };

        for (id, child) in &current.albums {
            if !include_all {
                let child_access = child.access.or(effective_access).unwrap_or_default();
                if !child_access.public {
                    continue;
                }
            }
            listed.albums.push(Album {
                id: Some(id.clone()),
                title: child.title.clone(),
                thumbnail: child.thumbnail(),
                access: child.access.unwrap_or_default(),
                ..Album::default()
            });
        }
        listed.albums.sort_by(|lhs, rhs| lhs.title.cmp(&rhs.title));

        if include_all {
            for (id, track) in &current.tracks {
                listed.tracks.push(Track {
                    id: id.clone(),
                    file_id: track.file_id.clone(),
                    title: track.title.clone(),
                    duration: 0.0,
                });
            }
            listed
                .tracks
                .sort_by(|lhs, rhs| natsort::compare(&lhs.title, &rhs.title));
        }

        if !ids.is_empty() && listed.albums.is_empty() && listed.tracks.is_empty() {
            return Err(Error::Forbidden);
        }

        Ok(listed)
    }

    /// Returns every visible album and track whose title contains the
    /// query as a case-insensitive substring.
    pub fn search(&self, query: &str, public_only: bool) -> SearchResult {
        let query = query.to_lowercase();
        let root = self.root.lock();

        let mut result = SearchResult::default();
        search_node(&root, root.access, &[], &query, public_only, &mut result);

        result.albums.sort_by(|lhs, rhs| lhs.title.cmp(&rhs.title));
        result
            .tracks
            .sort_by(|lhs, rhs| natsort::compare(&lhs.track.title, &rhs.track.title));
        result
    }
}

fn merge_album(target: &mut AlbumNode, album: &scanner::Album) -> anyhow::Result<()> {
    if let Some(thumbnail) = &album.thumbnail {
        let thumbnail_id = digest::file_id(thumbnail)
            .with_context(|| format!("could not create a thumbnail id for {}", thumbnail.display()))?;
        target.thumbnail_path = Some(thumbnail.clone());
        target.thumbnail_id = Some(thumbnail_id);
    }

    if let Some(access_file) = &album.access_file {
        let loaded = access::load(access_file)
            .with_context(|| format!("could not load the access file {}", access_file.display()))?;
        target.access = Some(loaded);
    }

    for (title, track) in &album.tracks {
        let file_id = digest::file_id(&track.path)
            .with_context(|| format!("could not create a file id for {}", track.path.display()))?;
        target.tracks.insert(
            digest::track_id(title),
            TrackNode {
                title: title.clone(),
                path: track.path.clone(),
                file_id,
            },
        );
    }

    for (title, child) in &album.albums {
        let mut node = AlbumNode::new(title.clone());
        merge_album(&mut node, child)?;
        target.albums.insert(digest::album_id(title), node);
    }

    Ok(())
}

fn collect_tracks(node: &AlbumNode, items: &mut Vec<Item>) {
    for track in node.tracks.values() {
        items.push(Item {
            id: track.file_id.as_str().to_owned(),
            path: track.path.clone(),
        });
    }
    for child in node.albums.values() {
        collect_tracks(child, items);
    }
}

fn collect_thumbnails(node: &AlbumNode, items: &mut Vec<Item>) {
    if let (Some(path), Some(id)) = (&node.thumbnail_path, &node.thumbnail_id) {
        items.push(Item {
            id: id.as_str().to_owned(),
            path: path.clone(),
        });
    }
    for child in node.albums.values() {
        collect_thumbnails(child, items);
    }
}

fn search_node(
    node: &AlbumNode,
    effective_access: Option<Access>,
    path: &[AlbumId],
    query: &str,
    public_only: bool,
    result: &mut SearchResult,
) {
    let visible = !public_only || effective_access.unwrap_or_default().public;
    if visible {
        if !path.is_empty() && node.title.to_lowercase().contains(query) {
            result.albums.push(BasicAlbum {
                path: path.to_vec(),
                title: node.title.clone(),
                thumbnail: node.thumbnail(),
            });
        }
        for (id, track) in &node.tracks {
            if track.title.to_lowercase().contains(query) {
                result.tracks.push(SearchResultTrack {
                    track: Track {
                        id: id.clone(),
                        file_id: track.file_id.clone(),
                        title: track.title.clone(),
                        duration: 0.0,
                    },
                    album: BasicAlbum {
                        path: path.to_vec(),
                        title: node.title.clone(),
                        thumbnail: node.thumbnail(),
                    },
                });
            }
        }
    }

    for (id, child) in &node.albums {
        let child_access = child.access.or(effective_access);
        let mut child_path = path.to_vec();
        child_path.push(id.clone());
        search_node(child, child_access, &child_path, query, public_only, result);
    }
}

#[cfg(test)]
mod tests;
