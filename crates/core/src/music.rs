// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Albums, tracks and their identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(
    /// Identifies an album within its parent, derived from the album title.
    AlbumId
);

id_newtype!(
    /// Identifies a track within its album, derived from the track title.
    TrackId
);

id_newtype!(
    /// Identifies the contents of a file on disk, derived from its path,
    /// size and modification time. Also serves as the conversion cache key.
    FileId
);

/// Per-album visibility options loaded from an access file.
///
/// An album without an access record of its own inherits the record of
/// its nearest ancestor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub file_id: FileId,
    pub title: String,
    pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<AlbumId>,

    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Thumbnail>,

    pub access: Access,

    /// The ancestors of this album starting from the one closest to the
    /// root and ending with this album itself. Only `id` and `title` are
    /// filled in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<Album>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub albums: Vec<Album>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<Track>,
}

/// An album reference as returned by search, addressed by its id path
/// from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAlbum {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<AlbumId>,

    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultTrack {
    pub track: Track,
    pub album: BasicAlbum,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub albums: Vec<BasicAlbum>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<SearchResultTrack>,
}
