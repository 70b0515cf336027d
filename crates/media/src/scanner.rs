// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Watching a directory of audio files and producing album tree
//! snapshots.
//!
//! A snapshot is a plain tree of directories bucketed into albums with
//! their tracks, thumbnails and access files classified by name. The
//! scanner knows nothing about identifiers or visibility; translating a
//! snapshot into the canonical library tree happens downstream.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::mpsc as std_mpsc,
    thread,
    time::Duration,
};

use anyhow::Context as _;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use walkdir::WalkDir;

/// A file with exactly this name carries the access record for its
/// containing directory.
pub const ACCESS_FILE_NAME: &str = "eggplant.access";

/// How long to wait after a filesystem event before rescanning, so that
/// a burst of renames produces a single snapshot.
const EVENT_QUIET_PERIOD: Duration = Duration::from_secs(1);

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Extensions recognized as tracks, each beginning with a dot,
    /// matched case-insensitively.
    pub track_extensions: Vec<String>,

    /// Filenames without extension recognized as thumbnails, matched
    /// case-insensitively.
    pub thumbnail_stems: Vec<String>,

    /// Extensions recognized as thumbnails, each beginning with a dot,
    /// matched case-insensitively. A file is a thumbnail only if both
    /// its stem and its extension match.
    pub thumbnail_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            track_extensions: [".flac", ".mp3", ".ogg", ".aac", ".wav", ".wma", ".aiff", ".opus"]
                .map(str::to_owned)
                .into(),
            thumbnail_stems: ["thumbnail", "album", "cover", "folder"]
                .map(str::to_owned)
                .into(),
            thumbnail_extensions: [".jpg", ".jpeg", ".png", ".gif"].map(str::to_owned).into(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        if self.track_extensions.is_empty() {
            return Err(Error::InvalidConfig("missing track extensions".to_owned()));
        }
        for ext in self
            .track_extensions
            .iter()
            .chain(&self.thumbnail_extensions)
        {
            if !ext.starts_with('.') {
                return Err(Error::InvalidConfig(format!(
                    "extension '{ext}' should start with a dot"
                )));
            }
        }
        if self.thumbnail_stems.iter().any(|stem| stem.is_empty()) {
            return Err(Error::InvalidConfig("empty thumbnail stem".to_owned()));
        }
        Ok(())
    }
}

/// One directory of the scanned tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Album {
    /// Path of the album cover, if any. When a directory contains
    /// multiple thumbnails the last visited one wins.
    pub thumbnail: Option<PathBuf>,

    /// Path of the access file, if any.
    pub access_file: Option<PathBuf>,

    /// Child albums keyed by directory name.
    pub albums: BTreeMap<String, Album>,

    /// Tracks keyed by title, i.e. the filename without its extension.
    pub tracks: BTreeMap<String, Track>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("initial scan failed")]
    InitialScan(#[source] anyhow::Error),

    #[error("could not watch the music directory")]
    Watch(#[from] notify::Error),
}

/// Watches a directory containing audio files and produces a snapshot
/// whenever its contents change.
#[derive(Debug, Clone)]
pub struct Scanner {
    directory: PathBuf,
    config: Config,
}

impl Scanner {
    pub fn new(directory: impl Into<PathBuf>, config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            directory: directory.into(),
            config,
        })
    }

    /// Starts the watcher and returns the channel on which snapshots are
    /// delivered. The initial scan runs before this method returns; its
    /// failure aborts the start. Scan failures after that are logged and
    /// the previous snapshot remains in force.
    pub async fn start(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Album>, Error> {
        // The initial scan carries the highest failure probability,
        // fail early instead of emitting nothing.
        let initial = {
            let scanner = self.clone();
            tokio::task::spawn_blocking(move || scanner.scan())
                .await
                .map_err(|err| Error::InitialScan(anyhow::Error::new(err)))?
                .map_err(Error::InitialScan)?
        };

        let (event_tx, event_rx) = std_mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(_) => {
                    let _ = event_tx.send(());
                }
                Err(err) => log::warn!("watcher error: {err}"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.directory, RecursiveMode::Recursive)?;

        let (snapshot_tx, snapshot_rx) = mpsc::channel(1);
        thread::spawn(move || {
            // Keep the watcher alive for as long as snapshots are wanted.
            let _watcher = watcher;

            if snapshot_tx.blocking_send(initial).is_err() {
                return;
            }

            loop {
                if *shutdown.borrow() {
                    return;
                }
                match event_rx.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                    Ok(()) => {}
                    Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
                }

                // Coalesce the burst that usually follows the first
                // event before rescanning.
                thread::sleep(EVENT_QUIET_PERIOD);
                while event_rx.try_recv().is_ok() {}

                match self.scan() {
                    Ok(album) => {
                        if snapshot_tx.blocking_send(album).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        log::error!("rescan of the music directory failed: {err:#}");
                    }
                }
            }
        });

        Ok(snapshot_rx)
    }

    /// Walks the directory once. Directory entries and symbolic links
    /// are skipped; subtrees without any tracks are pruned.
    pub fn scan(&self) -> anyhow::Result<Album> {
        let mut root = Album::default();
        for entry in WalkDir::new(&self.directory) {
            let entry = entry.context("walk failed")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if self.is_thumbnail(path) {
                self.album_for_file(&mut root, path)?.thumbnail = Some(path.to_path_buf());
            } else if is_access_file(path) {
                self.album_for_file(&mut root, path)?.access_file = Some(path.to_path_buf());
            } else if self.is_track(path) {
                let title = filename_without_extension(path);
                self.album_for_file(&mut root, path)?
                    .tracks
                    .insert(title, Track {
                        path: path.to_path_buf(),
                    });
            }
        }
        remove_empty_albums(&mut root);
        Ok(root)
    }

    fn album_for_file<'a>(&self, root: &'a mut Album, file: &Path) -> anyhow::Result<&'a mut Album> {
        let relative = file
            .strip_prefix(&self.directory)
            .context("file is not below the music directory")?;
        let mut album = root;
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                let name = component.as_os_str().to_string_lossy().into_owned();
                album = album.albums.entry(name).or_default();
            }
        }
        Ok(album)
    }

    fn is_track(&self, path: &Path) -> bool {
        extension_matches(path, &self.config.track_extensions)
    }

    fn is_thumbnail(&self, path: &Path) -> bool {
        let stem = filename_without_extension(path);
        self.config
            .thumbnail_stems
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(&stem))
            && extension_matches(path, &self.config.thumbnail_extensions)
    }
}

fn is_access_file(path: &Path) -> bool {
    path.file_name() == Some(OsStr::new(ACCESS_FILE_NAME))
}

fn extension_matches(path: &Path, extensions: &[String]) -> bool {
    let Some(extension) = path.extension().and_then(OsStr::to_str) else {
        return false;
    };
    let dotted = format!(".{extension}");
    extensions
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(&dotted))
}

fn filename_without_extension(path: &Path) -> String {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    match filename.rsplit_once('.') {
        Some((stem, _)) => stem.to_owned(),
        None => filename.into_owned(),
    }
}

fn remove_empty_albums(album: &mut Album) {
    for child in album.albums.values_mut() {
        remove_empty_albums(child);
    }
    album
        .albums
        .retain(|_, child| !child.albums.is_empty() || !child.tracks.is_empty());
}

#[cfg(test)]
mod tests;
