// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub serve_address: String,
    pub music_directory: PathBuf,
    pub data_directory: PathBuf,
    pub cache_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serve_address: "127.0.0.1:8118".to_owned(),
            music_directory: PathBuf::from("/path/to/music"),
            data_directory: PathBuf::from("/path/to/data"),
            cache_directory: PathBuf::from("/path/to/cache"),
        }
    }
}

/// The default configuration file, printed by `eggplant default-config`.
/// Must parse back to [`Config::default`].
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Specifies under which address you will be able to access the UI. The
# addresses are specified as "ip:port". If you want to listen only to
# local connections use "127.0.0.1:XXXX" as the IP and replace XXXX
# with a desired port. If you want to listen externally use
# "0.0.0.0:XXXX" as the IP and replace XXXX with a desired port.
serve_address = "127.0.0.1:8118"

# Path to a directory containing your music.
music_directory = "/path/to/music"

# Path to a directory which will be used for data storage. Eggplant will store
# its database in this directory. This directory should never be purged.
data_directory = "/path/to/data"

# Path to a directory which will be used for caching converted tracks and
# thumbnails. You should not remove files from this directory unless necessary
# as Eggplant ensures that old data is automatically removed and removing the
# cached files will force Eggplant to convert all tracks and thumbnails again.
cache_directory = "/path/to/cache"
"#;

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read the configuration file {}", path.display()))?;
    toml::from_str(&contents).context("could not parse the configuration file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_template_parses_to_the_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(Config::default(), config);
    }

    #[test]
    fn the_configuration_round_trips() {
        let config = Config {
            serve_address: "0.0.0.0:80".to_owned(),
            music_directory: PathBuf::from("/srv/music"),
            data_directory: PathBuf::from("/var/lib/eggplant"),
            cache_directory: PathBuf::from("/var/cache/eggplant"),
        };
        let serialized = toml::to_string(&config).unwrap();
        assert_eq!(config, toml::from_str(&serialized).unwrap());
    }
}
