// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use tempfile::TempDir;
use tokio::sync::watch;

use eggplant_media::scanner::{Config, Scanner};
use eggplant_store::{thumbnails::new_thumbnail_store, Options};

use super::*;

struct Fixture {
    _music: TempDir,
    _cache: TempDir,
    _shutdown_tx: watch::Sender<bool>,
    library: Arc<Library>,
    track_store: Arc<TrackStore>,
    thumbnail_store: Arc<Store>,
}

fn music_fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    std::fs::write(root.join("Root.mp3"), b"audio").unwrap();

    let public = root.join("Public Album");
    std::fs::create_dir(&public).unwrap();
    std::fs::write(public.join("eggplant.access"), "public: yes\n").unwrap();
    std::fs::write(public.join("01 One.mp3"), b"audio").unwrap();
    std::fs::write(public.join("2 Two.mp3"), b"audio").unwrap();
    std::fs::write(public.join("10 Ten.mp3"), b"audio").unwrap();
    std::fs::write(public.join("cover.jpg"), b"image").unwrap();

    let nested = public.join("Nested");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(nested.join("Deep.mp3"), b"audio").unwrap();

    let private = root.join("Private Album");
    std::fs::create_dir(&private).unwrap();
    std::fs::write(private.join("Secret.mp3"), b"audio").unwrap();

    dir
}

async fn fixture() -> Fixture {
    let music = music_fixture();
    let cache = tempfile::tempdir().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let track_store =
        TrackStore::new(cache.path(), Options::default(), shutdown_rx.clone()).unwrap();
    let thumbnail_store =
        new_thumbnail_store(cache.path(), Options::default(), shutdown_rx).unwrap();

    // The subscriber channel stays empty; snapshots are applied
    // directly to keep the tests synchronous.
    let (_snapshot_tx, snapshot_rx) = mpsc::channel(1);
    let library = Library::new(
        snapshot_rx,
        Arc::clone(&track_store),
        Arc::clone(&thumbnail_store),
    );

    let snapshot = Scanner::new(music.path(), Config::default())
        .unwrap()
        .scan()
        .unwrap();
    library.apply_snapshot(&snapshot).unwrap();

    Fixture {
        _music: music,
        _cache: cache,
        _shutdown_tx: shutdown_tx,
        library,
        track_store,
        thumbnail_store,
    }
}

fn public_id() -> AlbumId {
    digest::album_id("Public Album")
}

fn private_id() -> AlbumId {
    digest::album_id("Private Album")
}

fn nested_id() -> AlbumId {
    digest::album_id("Nested")
}

#[tokio::test]
async fn browse_root_lists_albums_and_tracks() {
    let fixture = fixture().await;

    let album = fixture.library.browse(&[], false).unwrap();
    assert_eq!("Eggplant", album.title);
    assert_eq!(None, album.id);
    assert!(album.parents.is_empty());
    assert_eq!(
        vec!["Private Album", "Public Album"],
        album
            .albums
            .iter()
            .map(|child| child.title.as_str())
            .collect::<Vec<_>>()
    );
    assert_eq!(
        vec!["Root"],
        album
            .tracks
            .iter()
            .map(|track| track.title.as_str())
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn browse_orders_tracks_naturally() {
    let fixture = fixture().await;

    let album = fixture.library.browse(&[public_id()], false).unwrap();
    assert_eq!(Some(public_id()), album.id);
    assert_eq!("Public Album", album.title);
    assert!(album.thumbnail.is_some());
    assert_eq!(
        vec!["01 One", "2 Two", "10 Ten"],
        album
            .tracks
            .iter()
            .map(|track| track.title.as_str())
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn browse_reports_parents_from_root_to_self() {
    let fixture = fixture().await;

    let album = fixture
        .library
        .browse(&[public_id(), nested_id()], false)
        .unwrap();
    assert_eq!(
        vec![
            (Some(public_id()), "Public Album".to_owned()),
            (Some(nested_id()), "Nested".to_owned()),
        ],
        album
            .parents
            .iter()
            .map(|parent| (parent.id.clone(), parent.title.clone()))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn browse_unknown_albums_is_not_found() {
    let fixture = fixture().await;

    assert_eq!(
        Err(Error::NotFound),
        fixture.library.browse(&[AlbumId::new("missing")], false)
    );
    assert_eq!(
        Err(Error::NotFound),
        fixture.library.browse(&[public_id(), private_id()], false)
    );
}

#[tokio::test]
async fn public_only_filters_the_root_listing() {
    let fixture = fixture().await;

    let album = fixture.library.browse(&[], true).unwrap();
    assert!(album.tracks.is_empty());
    assert_eq!(
        vec!["Public Album"],
        album
            .albums
            .iter()
            .map(|child| child.title.as_str())
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn access_records_are_inherited_from_ancestors() {
    let fixture = fixture().await;

    // `Nested` carries no access record of its own but inherits
    // `public: yes` from `Public Album`.
    let album = fixture
        .library
        .browse(&[public_id(), nested_id()], true)
        .unwrap();
    assert_eq!(1, album.tracks.len());
}

#[tokio::test]
async fn browsing_a_private_album_anonymously_is_forbidden() {
    let fixture = fixture().await;

    assert_eq!(
        Err(Error::Forbidden),
        fixture.library.browse(&[private_id()], true)
    );
    assert!(fixture.library.browse(&[private_id()], false).is_ok());
}

#[tokio::test]
async fn search_finds_albums_and_tracks() {
    let fixture = fixture().await;

    let result = fixture.library.search("NESTED", false);
    assert_eq!(1, result.albums.len());
    assert_eq!("Nested", result.albums[0].title);
    assert_eq!(vec![public_id(), nested_id()], result.albums[0].path);

    let result = fixture.library.search("deep", false);
    assert_eq!(1, result.tracks.len());
    assert_eq!("Deep", result.tracks[0].track.title);
    assert_eq!("Nested", result.tracks[0].album.title);
    assert_eq!(vec![public_id(), nested_id()], result.tracks[0].album.path);
}

#[tokio::test]
async fn search_respects_public_only() {
    let fixture = fixture().await;

    assert_eq!(1, fixture.library.search("secret", false).tracks.len());
    assert!(fixture.library.search("secret", true).tracks.is_empty());
    assert_eq!(1, fixture.library.search("deep", true).tracks.len());
}

#[tokio::test]
async fn item_sets_are_published_to_the_stores() {
    let fixture = fixture().await;

    let track_stats = fixture.track_store.get_stats().await.unwrap();
    assert_eq!(6, track_stats.all_items);

    let thumbnail_stats = fixture.thumbnail_store.get_stats().await.unwrap();
    assert_eq!(1, thumbnail_stats.all_items);
}
