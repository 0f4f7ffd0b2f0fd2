use std::{
    fs::read_to_string,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use log::debug;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Inspector settings, read from a TOML file. Every key is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Query results kept per SQL server.
    pub sql_cache_capacity: usize,
    /// Address bound in listen mode, port 0 for an ephemeral one.
    pub listen_address: SocketAddr,
    /// Service extension asked to dial back in listen mode.
    pub connect_extension: String,
    /// Read poll period of the connection I/O threads.
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sql_cache_capacity: 5,
            listen_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            connect_extension: "ext.storage_inspector.connect".to_string(),
            poll_interval_ms: 10,
        }
    }
}

impl Config {
    const DEFAULT_PATH: &'static str = ".config/storage-inspector/config.toml";

    /// Loads `path`, or the file under the home directory when `path` is `None`.
    /// A missing default file yields the defaults; an explicit path must exist.
    pub fn from_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match home::home_dir() {
                Some(home) => {
                    let path = home.join(Self::DEFAULT_PATH);
                    if !path.exists() {
                        debug!("no config at {}, using defaults", path.display());
                        return Ok(Self::default());
                    }
                    path
                }
                None => return Ok(Self::default()),
            },
        };

        let data = read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&data).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn parse(data: &str) -> Result<Self, toml::de::Error> {
        toml::de::from_str(data)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
