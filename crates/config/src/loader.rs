//! Configuration loading from TOML files and the environment.

use std::path::Path;

use anyhow::Context;

use crate::{Config, RedisConfig, StorageConfig};

/// Environment variable naming the remote store endpoint.
const ENV_STORE_URL: &str = "REDIS_URL";

/// Environment variable carrying the store access token.
const ENV_STORE_TOKEN: &str = "REDIS_TOKEN";

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse configuration file {}", path.display()))?;

    Ok(config)
}

pub(crate) fn from_env() -> Config {
    let Ok(url) = std::env::var(ENV_STORE_URL) else {
        log::debug!("{ENV_STORE_URL} not set, using in-memory storage");
        return Config {
            storage: StorageConfig::Memory,
        };
    };

    let redis = RedisConfig {
        url,
        password: std::env::var(ENV_STORE_TOKEN).ok(),
        ..RedisConfig::default()
    };

    Config {
        storage: StorageConfig::Redis(Box::new(redis)),
    }
}
