//! Configuration structures for the rate-limiting and cache layer.

#![deny(missing_docs)]

mod loader;
mod storage;

use std::path::Path;

use serde::Deserialize;
pub use storage::*;

/// Main configuration for the subsystem.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Key-value store backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Build configuration from the process environment.
    ///
    /// Reads `REDIS_URL` and `REDIS_TOKEN` once; if no URL is set the
    /// in-memory backend is used. These are the only two environment
    /// values the subsystem consumes.
    pub fn from_env() -> Config {
        loader::from_env()
    }
}
