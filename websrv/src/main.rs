// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(unsafe_code)]
#![warn(clippy::all)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod config;
mod env;
mod routing;
mod runtime;

/// A music streaming server.
#[derive(Debug, Parser)]
#[command(name = "eggplant", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the server.
    Run {
        /// Path to the configuration file.
        config: PathBuf,
    },
    /// Print the default configuration file.
    DefaultConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::DefaultConfig => {
            print!("{}", config::DEFAULT_CONFIG_TEMPLATE);
            Ok(())
        }
        Command::Run { config } => {
            env::init_tracing_and_logging()?;
            let config = config::load(&config)?;
            let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            tokio_runtime.block_on(runtime::run(config))
        }
    }
}
