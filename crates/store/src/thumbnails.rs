// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The thumbnail store: album covers resized to a fixed square and
//! re-encoded as JPEG.

use std::{
    io::{self, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use async_trait::async_trait;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use tokio::sync::watch;

use crate::{Converter, Item, Options, Store};

const THUMBNAIL_SIZE: u32 = 200;
const THUMBNAIL_EXTENSION: &str = "jpg";
const THUMBNAIL_DIRECTORY: &str = "thumbnails";
const JPEG_QUALITY: u8 = 95;

pub fn new_thumbnail_store(
    cache_directory: &Path,
    options: Options,
    shutdown: watch::Receiver<bool>,
) -> io::Result<Arc<Store>> {
    let converter = Arc::new(ThumbnailConverter::new(cache_directory));
    Store::new(converter, options, shutdown)
}

#[derive(Debug)]
pub struct ThumbnailConverter {
    output_directory: PathBuf,
}

impl ThumbnailConverter {
    #[must_use]
    pub fn new(cache_directory: &Path) -> Self {
        Self {
            output_directory: cache_directory.join(THUMBNAIL_DIRECTORY),
        }
    }
}

#[async_trait]
impl Converter for ThumbnailConverter {
    fn output_file(&self, id: &str) -> PathBuf {
        self.output_directory
            .join(format!("{id}.{THUMBNAIL_EXTENSION}"))
    }

    fn temporary_output_file(&self, id: &str) -> PathBuf {
        self.output_directory
            .join(format!("_{id}.{THUMBNAIL_EXTENSION}"))
    }

    fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    async fn convert(&self, item: &Item) -> anyhow::Result<()> {
        let source = item.path.clone();
        let temporary_output = self.temporary_output_file(&item.id);
        let output = self.output_file(&item.id);

        // Decoding and resizing are CPU-bound, keep them off the
        // async workers' reactor threads.
        tokio::task::spawn_blocking(move || {
            let decoded = image::open(&source).context("decoding failed")?;
            let resized =
                decoded.resize_exact(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3);

            let file =
                std::fs::File::create(&temporary_output).context("could not create an output file")?;
            let mut writer = BufWriter::new(file);
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            encoder
                .encode_image(&resized.to_rgb8())
                .context("encoding failed")?;
            drop(encoder);
            writer
                .into_inner()
                .map_err(|err| anyhow::anyhow!("flush failed: {err}"))?;

            std::fs::rename(&temporary_output, &output).context("move failed")
        })
        .await
        .context("thumbnail conversion task failed")?
    }
}
