// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use tempfile::TempDir;
use tokio::sync::watch;

use super::*;

fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    std::fs::write(root.join("a.mp3"), b"root track").unwrap();

    let album_one = root.join("Album One");
    std::fs::create_dir(&album_one).unwrap();
    std::fs::write(album_one.join("01 Intro.MP3"), b"audio").unwrap();
    std::fs::write(album_one.join("cover.jpg"), b"image").unwrap();
    std::fs::write(album_one.join("eggplant.access"), "public: yes\n").unwrap();

    let sub = album_one.join("Sub");
    std::fs::create_dir(&sub).unwrap();
    std::fs::write(sub.join("deep.flac"), b"audio").unwrap();

    let album_two = root.join("Album Two");
    std::fs::create_dir(&album_two).unwrap();
    std::fs::write(album_two.join("notes.txt"), b"text").unwrap();

    std::fs::create_dir(root.join("Empty")).unwrap();

    let covers_only = root.join("Covers Only");
    std::fs::create_dir(&covers_only).unwrap();
    std::fs::write(covers_only.join("Folder.PNG"), b"image").unwrap();

    dir
}

fn scanner(directory: &Path) -> Scanner {
    Scanner::new(directory, Config::default()).unwrap()
}

#[test]
fn scan_classifies_files() {
    let dir = fixture();
    let root = scanner(dir.path()).scan().unwrap();

    assert!(root.tracks.contains_key("a"));

    let album_one = root.albums.get("Album One").unwrap();
    let track = album_one.tracks.get("01 Intro").unwrap();
    assert_eq!(dir.path().join("Album One").join("01 Intro.MP3"), track.path);
    assert_eq!(
        Some(dir.path().join("Album One").join("cover.jpg")),
        album_one.thumbnail
    );
    assert_eq!(
        Some(dir.path().join("Album One").join("eggplant.access")),
        album_one.access_file
    );

    let sub = album_one.albums.get("Sub").unwrap();
    assert!(sub.tracks.contains_key("deep"));
}

#[test]
fn trackless_subtrees_are_pruned() {
    let dir = fixture();
    let root = scanner(dir.path()).scan().unwrap();

    assert!(!root.albums.contains_key("Album Two"));
    assert!(!root.albums.contains_key("Empty"));
    assert!(!root.albums.contains_key("Covers Only"));
    assert_eq!(1, root.albums.len());
}

#[test]
fn thumbnails_require_both_stem_and_extension() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cover.mp3"), b"audio").unwrap();
    std::fs::write(dir.path().join("thumbnail.txt"), b"text").unwrap();
    std::fs::write(dir.path().join("COVER.JpG"), b"image").unwrap();

    let root = scanner(dir.path()).scan().unwrap();

    assert!(root.tracks.contains_key("cover"));
    assert_eq!(Some(dir.path().join("COVER.JpG")), root.thumbnail);
}

#[cfg(unix)]
#[test]
fn symlinked_directories_are_ignored() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("hidden.mp3"), b"audio").unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("visible.mp3"), b"audio").unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();

    let root = scanner(dir.path()).scan().unwrap();

    assert!(root.tracks.contains_key("visible"));
    assert!(!root.albums.contains_key("linked"));
}

#[test]
fn scan_fails_for_a_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    assert!(scanner(&missing).scan().is_err());
}

#[test]
fn config_requires_track_extensions() {
    let config = Config {
        track_extensions: vec![],
        ..Config::default()
    };
    assert!(matches!(
        Scanner::new("/music", config),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn config_requires_dotted_extensions() {
    let config = Config {
        track_extensions: vec!["mp3".to_owned()],
        ..Config::default()
    };
    assert!(matches!(
        Scanner::new("/music", config),
        Err(Error::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn start_emits_an_initial_snapshot() {
    let dir = fixture();
    let scanner = scanner(dir.path());
    let expected = scanner.scan().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut snapshots = scanner.start(shutdown_rx).await.unwrap();

    let initial = snapshots.recv().await.unwrap();
    assert_eq!(expected, initial);

    shutdown_tx.send(true).unwrap();
}

#[tokio::test]
async fn start_fails_when_the_initial_scan_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    assert!(matches!(
        scanner(&missing).start(shutdown_rx).await,
        Err(Error::InitialScan(_))
    ));
}
