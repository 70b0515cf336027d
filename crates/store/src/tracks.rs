// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The track store: Opus/Ogg transcoding via an external ffmpeg binary
//! and a duration cache fed by ffprobe.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{process::Command, sync::watch};

use crate::{ConvertedFile, Converter, Item, Options, Result, Store, StoreStats};

const TRACK_EXTENSION: &str = "ogg";
const TRACK_DIRECTORY: &str = "tracks";
const OPUS_BITRATE: &str = "96K";

#[derive(Debug)]
pub struct TrackConverter {
    output_directory: PathBuf,
}

impl TrackConverter {
    #[must_use]
    pub fn new(cache_directory: &Path) -> Self {
        Self {
            output_directory: cache_directory.join(TRACK_DIRECTORY),
        }
    }
}

#[async_trait]
impl Converter for TrackConverter {
    fn output_file(&self, id: &str) -> PathBuf {
        self.output_directory.join(format!("{id}.{TRACK_EXTENSION}"))
    }

    fn temporary_output_file(&self, id: &str) -> PathBuf {
        self.output_directory
            .join(format!("_{id}.{TRACK_EXTENSION}"))
    }

    fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    async fn convert(&self, item: &Item) -> anyhow::Result<()> {
        let temporary_output = self.temporary_output_file(&item.id);
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(&item.path)
            .args(["-vn", "-c:a", "libopus", "-b:a", OPUS_BITRATE])
            .arg(&temporary_output)
            .output()
            .await
            .context("ffmpeg execution failed")?;
        if !output.status.success() {
            log::error!(
                "ffmpeg failed, stderr: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            anyhow::bail!("ffmpeg exited with {}", output.status);
        }

        tokio::fs::rename(&temporary_output, self.output_file(&item.id))
            .await
            .context("move failed")?;
        Ok(())
    }
}

/// A conversion store for tracks that additionally knows how long each
/// source track plays for.
#[derive(Debug)]
pub struct TrackStore {
    store: Arc<Store>,
    durations: Mutex<HashMap<String, f64>>,
}

impl TrackStore {
    pub fn new(
        cache_directory: &Path,
        options: Options,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Arc<Self>> {
        let converter = Arc::new(TrackConverter::new(cache_directory));
        let store = Store::new(converter, options, shutdown)?;
        Ok(Arc::new(Self {
            store,
            durations: Mutex::new(HashMap::new()),
        }))
    }

    pub fn set_items(&self, items: Vec<Item>) {
        {
            let ids: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
            let mut durations = self.durations.lock();
            durations.retain(|id, _| ids.contains(id.as_str()));
        }
        self.store.set_items(items);
    }

    pub async fn get_converted_file(&self, id: &str) -> Result<ConvertedFile> {
        self.store.get_converted_file(id).await
    }

    pub async fn get_stats(&self) -> anyhow::Result<StoreStats> {
        self.store.get_stats().await
    }

    /// The duration of the source track in seconds, or 0.0 when it
    /// cannot be measured. Results are cached until the item set
    /// changes.
    pub async fn duration(&self, id: &str) -> f64 {
        let Some(path) = self.store.item_path(id) else {
            return 0.0;
        };
        if let Some(duration) = self.durations.lock().get(id) {
            return *duration;
        }
        // Measured outside the lock; concurrent probes for the same id
        // just overwrite each other with the same value.
        match probe_duration(&path).await {
            Ok(duration) => {
                self.durations.lock().insert(id.to_owned(), duration);
                duration
            }
            Err(err) => {
                log::debug!("duration of '{}' could not be measured: {err:#}", path.display());
                0.0
            }
        }
    }
}

async fn probe_duration(path: &Path) -> anyhow::Result<f64> {
    tokio::fs::metadata(path).await.context("stat failed")?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;
    if !output.status.success() {
        log::error!(
            "ffprobe failed, stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        anyhow::bail!("ffprobe exited with {}", output.status);
    }

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .context("could not parse the duration")
}
