// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic identifiers derived from SHA-256 digests.
//!
//! Album and track identifiers depend only on the title, so a track
//! keeps its id when the collection is re-scanned. File identifiers mix
//! in the file size and modification time, so a replaced file gets a new
//! id and a new conversion cache entry.

use std::{
    io,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use sha2::{Digest, Sha256};

use eggplant_core::music::{AlbumId, FileId, TrackId};

const SHORT_HASH_LEN: usize = 20;

#[must_use]
pub fn album_id(title: &str) -> AlbumId {
    AlbumId::new(short_hash(title))
}

#[must_use]
pub fn track_id(title: &str) -> TrackId {
    TrackId::new(short_hash(title))
}

pub fn file_id(path: &Path) -> io::Result<FileId> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_secs())
        .unwrap_or_default();
    let input = format!("{}-{}-{}", path.display(), metadata.len(), mtime);
    Ok(FileId::new(long_hash(&input)))
}

fn long_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn short_hash(input: &str) -> String {
    let mut hash = long_hash(input);
    hash.truncate(SHORT_HASH_LEN);
    hash
}
