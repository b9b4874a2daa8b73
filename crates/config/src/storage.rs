//! Key-value store backend configuration structures.

use duration_str::deserialize_option_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default).
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Redis storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Access token, applied as the connection password when set.
    ///
    /// Overrides any password embedded in the URL. Managed Redis
    /// offerings usually hand out URL and token as two separate values.
    pub password: Option<String>,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all keys written by this subsystem.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: Option<String>,
    /// Response timeout for Redis commands.
    #[serde(
        default = "default_response_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub response_timeout: Option<Duration>,
    /// Connection timeout.
    #[serde(
        default = "default_connection_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub connection_timeout: Option<Duration>,
}

fn default_key_prefix() -> Option<String> {
    Some("ratelimit:".to_string())
}

fn default_response_timeout() -> Option<Duration> {
    Some(Duration::from_secs(1))
}

fn default_connection_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            password: None,
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Redis connection pool configuration (deadpool).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Minimum number of idle connections.
    pub min_idle: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            min_idle: Some(0),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Enable TLS (automatically enabled for rediss:// URLs).
    pub enabled: bool,
    /// Allow insecure connections (skip certificate validation).
    pub insecure: Option<bool>,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_storage_config() {
        let config = StorageConfig::default();
        insta::assert_debug_snapshot!(config, @r###"
        Memory
        "###);
    }

    #[test]
    fn deserialize_memory_storage() {
        let toml = r#"
            type = "memory"
        "#;
        let config: StorageConfig = toml::from_str(toml).unwrap();
        insta::assert_debug_snapshot!(config, @r###"
        Memory
        "###);
    }

    #[test]
    fn deserialize_redis_storage_minimal() {
        let toml = r#"
            type = "redis"
            url = "redis://localhost:6379/0"
        "#;
        let config: StorageConfig = toml::from_str(toml).unwrap();

        let StorageConfig::Redis(redis) = config else {
            unreachable!("expected redis storage");
        };

        assert_eq!(redis.url, "redis://localhost:6379/0");
        assert_eq!(redis.password, None);
        assert_eq!(redis.key_prefix.as_deref(), Some("ratelimit:"));
        assert_eq!(redis.response_timeout, Some(Duration::from_secs(1)));
        assert_eq!(redis.pool.max_size, Some(16));
    }

    #[test]
    fn deserialize_redis_storage_full() {
        let toml = r#"
            type = "redis"
            url = "rediss://cache.internal:6380/0"
            password = "sekret"
            key_prefix = "myapp:"
            response_timeout = "2s"
            connection_timeout = "10s"

            [pool]
            max_size = 32
            min_idle = 4
            timeout_create = "10s"
            timeout_wait = "2s"
            timeout_recycle = "600s"

            [tls]
            enabled = true
            insecure = false
            ca_cert_path = "/path/to/ca.crt"
        "#;
        let config: StorageConfig = toml::from_str(toml).unwrap();

        let StorageConfig::Redis(redis) = config else {
            unreachable!("expected redis storage");
        };

        assert_eq!(redis.url, "rediss://cache.internal:6380/0");
        assert_eq!(redis.password.as_deref(), Some("sekret"));
        assert_eq!(redis.key_prefix.as_deref(), Some("myapp:"));
        assert_eq!(redis.response_timeout, Some(Duration::from_secs(2)));
        assert_eq!(redis.connection_timeout, Some(Duration::from_secs(10)));
        assert_eq!(redis.pool.max_size, Some(32));
        assert_eq!(redis.pool.min_idle, Some(4));
        assert_eq!(redis.pool.timeout_recycle, Some(Duration::from_secs(600)));

        let tls = redis.tls.expect("tls section");
        assert!(tls.enabled);
        assert_eq!(tls.insecure, Some(false));
        assert_eq!(tls.ca_cert_path.as_deref(), Some("/path/to/ca.crt"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let toml = r#"
            type = "redis"
            url = "redis://localhost:6379"
            nope = true
        "#;
        let result: Result<StorageConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
