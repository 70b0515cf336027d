// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! On-demand conversion and on-disk caching of tracks and thumbnails.
//!
//! The store owns a content-addressed cache directory. Requests for an
//! item that has not been converted yet are funneled through a bounded
//! pool of conversion workers with at most one conversion in flight per
//! item id; all concurrent requests for the same id share that one
//! outcome. Converted files that have not been requested for a retention
//! window are evicted by a background pass.

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

use std::{
    collections::{HashMap, HashSet},
    fmt,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};

pub mod thumbnails;
pub mod tracks;

/// How long a converted item survives without being requested.
const RETENTION: Duration = Duration::from_secs(30 * 60);

/// Delay before the next eviction pass after a failed one. Most
/// failures are I/O related and immediate retries would just hit the
/// same condition again.
const EVICTION_ERROR_DELAY: Duration = Duration::from_secs(60);

/// A unit of work for the store: an opaque item id and the absolute
/// path of the source file it is converted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub path: PathBuf,
}

/// Produces the cache layout and performs the actual conversion.
///
/// `convert` must write to the temporary output file and atomically
/// rename it to the output file on success, so that the presence of the
/// output file always means "converted and complete".
#[async_trait]
pub trait Converter: Send + Sync + 'static {
    fn output_file(&self, id: &str) -> PathBuf;
    fn temporary_output_file(&self, id: &str) -> PathBuf;
    fn output_directory(&self) -> &Path;
    async fn convert(&self, item: &Item) -> anyhow::Result<()>;
}

/// Conversion outcomes are fanned out to every waiter of an item id,
/// hence the error must be cloneable.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("item does not exist")]
    NotFound,

    #[error("store is shutting down")]
    Terminated,

    #[error("conversion failed: {0}")]
    Conversion(Arc<anyhow::Error>),

    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An open handle onto a converted file, ready to be streamed to a
/// client. Dropping the handle closes the file.
#[derive(Debug)]
pub struct ConvertedFile {
    /// The file name within the cache, e.g. `<id>.ogg`.
    pub name: String,
    pub modified: SystemTime,
    pub len: u64,
    pub content: tokio::fs::File,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub all_items: u64,
    pub converted_items: u64,
    pub original_size: u64,
    pub converted_size: u64,
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Number of conversion workers and thereby the bound on concurrent
    /// conversions.
    pub worker_count: usize,
    pub retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            retention: RETENTION,
        }
    }
}

type Waiter = oneshot::Sender<Result<()>>;

struct ConversionRequest {
    id: String,
    waiter: Waiter,
}

#[derive(Default)]
struct State {
    /// The current publishable set, item id to source path.
    items: HashMap<String, PathBuf>,

    /// When each item id was last requested. Pruned of unpublished ids
    /// whenever the item set is replaced.
    access_times: HashMap<String, Instant>,

    /// A key in this map means exactly one worker is converting the id;
    /// everyone else interested in the outcome is queued as a waiter.
    ongoing: HashMap<String, Vec<Waiter>>,
}

pub struct Store {
    state: Mutex<State>,
    conversions_tx: mpsc::Sender<ConversionRequest>,
    converter: Arc<dyn Converter>,
    retention: Duration,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("output_directory", &self.converter.output_directory())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates the output directory and launches the conversion workers
    /// and the eviction worker. All workers terminate when `shutdown`
    /// flips.
    pub fn new(
        converter: Arc<dyn Converter>,
        options: Options,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Arc<Self>> {
        std::fs::create_dir_all(converter.output_directory())?;

        let Options {
            worker_count,
            retention,
        } = options;
        let (conversions_tx, conversions_rx) = mpsc::channel(1);
        let store = Arc::new(Self {
            state: Mutex::new(State::default()),
            conversions_tx,
            converter,
            retention,
        });

        let conversions_rx = Arc::new(AsyncMutex::new(conversions_rx));
        for _ in 0..worker_count.max(1) {
            tokio::spawn(Arc::clone(&store).conversion_worker(
                Arc::clone(&conversions_rx),
                shutdown.clone(),
            ));
        }
        tokio::spawn(Arc::clone(&store).eviction_worker(shutdown));

        Ok(store)
    }

    /// Replaces the published item set wholesale. Conversions already in
    /// flight for ids that are no longer published are allowed to
    /// finish; the next eviction pass removes their output.
    pub fn set_items(&self, items: Vec<Item>) {
        let mut state = self.state.lock();
        state.items = items
            .into_iter()
            .map(|Item { id, path }| (id, path))
            .collect();
        let State {
            items,
            access_times,
            ..
        } = &mut *state;
        access_times.retain(|id, _| items.contains_key(id));
    }

    /// Returns a handle onto the converted file for `id`, converting
    /// first if necessary. Concurrent calls for the same id trigger at
    /// most one conversion. Dropping the returned future abandons the
    /// wait; the conversion itself keeps running for the other waiters.
    pub async fn get_converted_file(&self, id: &str) -> Result<ConvertedFile> {
        {
            let mut state = self.state.lock();
            state.access_times.insert(id.to_owned(), Instant::now());
            if !state.items.contains_key(id) {
                return Err(Error::NotFound);
            }
        }

        match self.open_converted_file(id).await {
            Ok(file) => return Ok(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.conversions_tx
            .send(ConversionRequest {
                id: id.to_owned(),
                waiter: reply_tx,
            })
            .await
            .map_err(|_| Error::Terminated)?;
        reply_rx.await.map_err(|_| Error::Terminated)??;

        self.open_converted_file(id).await.map_err(Error::from)
    }

    pub async fn get_stats(&self) -> anyhow::Result<StoreStats> {
        let (all_items, source_paths) = {
            let state = self.state.lock();
            (
                state.items.len() as u64,
                state.items.values().cloned().collect::<Vec<_>>(),
            )
        };

        let mut original_size = 0;
        for path in source_paths {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) => original_size += metadata.len(),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err).context("could not stat a source file"),
            }
        }

        let mut converted_items = 0;
        let mut converted_size = 0;
        match tokio::fs::read_dir(self.converter.output_directory()).await {
            Ok(mut entries) => {
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .context("could not read the output directory")?
                {
                    match entry.metadata().await {
                        Ok(metadata) if metadata.is_file() => {
                            converted_items += 1;
                            converted_size += metadata.len();
                        }
                        Ok(_) => {}
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(err) => return Err(err).context("could not stat a converted file"),
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).context("could not read the output directory"),
        }

        Ok(StoreStats {
            all_items,
            converted_items,
            original_size,
            converted_size,
        })
    }

    fn item_path(&self, id: &str) -> Option<PathBuf> {
        self.state.lock().items.get(id).cloned()
    }

    async fn open_converted_file(&self, id: &str) -> io::Result<ConvertedFile> {
        let path = self.converter.output_file(id);
        let file = tokio::fs::File::open(&path).await?;
        let metadata = file.metadata().await?;
        Ok(ConvertedFile {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            modified: metadata.modified()?,
            len: metadata.len(),
            content: file,
        })
    }

    async fn conversion_worker(
        self: Arc<Self>,
        requests: Arc<AsyncMutex<mpsc::Receiver<ConversionRequest>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let request = {
                let mut requests = requests.lock().await;
                tokio::select! {
                    request = requests.recv() => request,
                    _ = shutdown.changed() => return,
                }
            };
            let Some(request) = request else {
                return;
            };
            self.convert(request).await;
        }
    }

    async fn convert(&self, request: ConversionRequest) {
        let ConversionRequest { id, waiter } = request;

        // Claim the id or queue behind the conversion already in flight.
        let item_path = {
            let mut state = self.state.lock();
            if let Some(waiters) = state.ongoing.get_mut(&id) {
                waiters.push(waiter);
                return;
            }
            state.ongoing.insert(id.clone(), vec![waiter]);
            state.items.get(&id).cloned()
        };

        let outcome = self.run_conversion(&id, item_path).await;
        if let Err(err) = &outcome {
            log::error!("conversion failed: {err:#}");
        }
        let outcome = outcome.map_err(|err| Error::Conversion(Arc::new(err)));

        // Reply to every waiter registered for this id, including the
        // ones that arrived while the conversion was running.
        let waiters = {
            let mut state = self.state.lock();
            state.ongoing.remove(&id).unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_conversion(&self, id: &str, item_path: Option<PathBuf>) -> anyhow::Result<()> {
        let Some(path) = item_path else {
            anyhow::bail!("item does not exist");
        };

        // A racing worker may have produced the file in the meantime.
        match tokio::fs::metadata(self.converter.output_file(id)).await {
            Ok(_) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).context("could not stat the output file"),
        }

        let started = Instant::now();
        let result = self
            .converter
            .convert(&Item {
                id: id.to_owned(),
                path: path.clone(),
            })
            .await;
        log::debug!(
            "conversion of '{}' ended after {:?}, err: {}",
            path.display(),
            started.elapsed(),
            result.is_err(),
        );
        result.with_context(|| format!("conversion of '{}' failed", path.display()))
    }

    async fn eviction_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let delay = match self.evict().await {
                Ok(()) => self.retention / 2,
                Err(err) => {
                    log::error!("eviction failed: {err:#}");
                    EVICTION_ERROR_DELAY
                }
            };
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn evict(&self) -> anyhow::Result<()> {
        let permitted = {
            let state = self.state.lock();
            let now = Instant::now();
            let mut permitted = HashSet::new();
            for (id, accessed) in &state.access_times {
                if now.duration_since(*accessed) < self.retention {
                    permitted.insert(self.converter.output_file(id));
                }
            }
            // Never pull an in-flight write out from under a worker.
            for id in state.ongoing.keys() {
                permitted.insert(self.converter.output_file(id));
                permitted.insert(self.converter.temporary_output_file(id));
            }
            permitted
        };

        let mut entries = match tokio::fs::read_dir(self.converter.output_directory()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err).context("could not read the output directory"),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("could not read the output directory")?
        {
            let path = entry.path();
            if permitted.contains(&path) {
                continue;
            }
            log::debug!("evicting {}", path.display());
            let removed = match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => tokio::fs::remove_dir_all(&path).await,
                _ => tokio::fs::remove_file(&path).await,
            };
            match removed {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("could not remove {}", path.display()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
