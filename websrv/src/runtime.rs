// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wiring of the long-lived components and the HTTP server.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use tokio::sync::watch;
use warp::Filter as _;

use eggplant_library::Library;
use eggplant_media::scanner::{self, Scanner};
use eggplant_repo_redb::{open_database, TransactionProvider};
use eggplant_store::{thumbnails::new_thumbnail_store, tracks::TrackStore, Options};
use eggplant_usecases::{
    auth::{Auth, LastSeenUpdater, PasswordHasher, DEFAULT_FLUSH_INTERVAL},
    music::Music,
    stats::Stats,
};

use crate::{config::Config, routing};

const DATABASE_FILE: &str = "eggplant.database";

pub(crate) async fn run(config: Config) -> anyhow::Result<()> {
    log::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let address: SocketAddr = config
        .serve_address
        .parse()
        .context("invalid serve_address")?;

    std::fs::create_dir_all(&config.data_directory)
        .context("could not create the data directory")?;
    let db = open_database(&config.data_directory.join(DATABASE_FILE))?;
    let provider = TransactionProvider::new(db);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let track_store = TrackStore::new(
        &config.cache_directory,
        Options::default(),
        shutdown_rx.clone(),
    )
    .context("could not create the track store")?;
    let thumbnail_store = new_thumbnail_store(
        &config.cache_directory,
        Options::default(),
        shutdown_rx.clone(),
    )
    .context("could not create the thumbnail store")?;

    log::info!(
        "Scanning the music directory {}",
        config.music_directory.display()
    );
    let scanner = Scanner::new(&config.music_directory, scanner::Config::default())?;
    let snapshots = scanner.start(shutdown_rx.clone()).await?;
    let library = Library::new(
        snapshots,
        Arc::clone(&track_store),
        Arc::clone(&thumbnail_store),
    );

    let last_seen = LastSeenUpdater::new(Arc::clone(&provider));
    tokio::spawn(Arc::clone(&last_seen).run(DEFAULT_FLUSH_INTERVAL, shutdown_rx));

    let auth = Arc::new(Auth::new(
        Arc::clone(&provider),
        PasswordHasher::new(),
        last_seen,
    ));
    let music = Arc::new(Music::new(
        library,
        Arc::clone(&track_store),
        Arc::clone(&thumbnail_store),
    ));
    let stats = Arc::new(Stats::new(provider, track_store, thumbnail_store));

    let filters = routing::create_filters(auth, music, stats)
        .recover(routing::handle_rejection);

    log::info!("Starting the server");
    let (bound_address, server) =
        warp::serve(filters).bind_with_graceful_shutdown(address, async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Received an interrupt signal");
        });
    log::info!("Listening on http://{bound_address}");
    server.await;

    log::info!("Shutting down");
    let _ = shutdown_tx.send(true);

    Ok(())
}
