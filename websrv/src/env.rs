// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

const ENV_FILTER_DEFAULT: &str = "info";

pub fn init_tracing_and_logging() -> anyhow::Result<()> {
    // Capture and redirect all log messages as tracing events
    LogTracer::init()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(ENV_FILTER_DEFAULT));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    set_global_default(subscriber)?;

    Ok(())
}
