//! Thin adapter over the remote key-value store.
//!
//! Exposes the store primitives the rate limiter and the cache build on:
//! get/set with expiry, deletion, atomic increment, sorted-set and set
//! operations, key scans, and atomic multi-command batches. No business
//! logic lives here.

#![deny(missing_docs)]

mod command;
mod error;
mod memory;
mod redis;
mod redis_pool;

use std::time::Duration;

use config::StorageConfig;

pub use command::{StoreCommand, StoreReply};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Interface over the remote store's primitives.
///
/// Every method is a single network round trip (or one pipelined batch)
/// against the backing store.
#[allow(async_fn_in_trait)]
pub trait StoreBackend: Send + Sync {
    /// Read the raw value stored at `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` at `key` with a TTL.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Store `value` at `key` with a TTL, only if the key does not exist.
    ///
    /// Returns whether the write happened.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError>;

    /// Delete the given keys, returning how many of them existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Atomically increment the integer stored at `key`, creating it at
    /// zero when absent. Returns the value after the increment.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set the TTL of `key`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set the TTL of `key` only if the new TTL is greater than the
    /// current one (`EXPIRE ... GT`).
    async fn expire_gt(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Add members to the set stored at `key`.
    async fn sadd(&self, key: &str, members: &[String]) -> Result<(), StoreError>;

    /// Read all members of the set stored at `key`. An absent key yields
    /// an empty vector.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Scan the keyspace for keys matching a glob pattern.
    ///
    /// Not O(1); intended for maintenance paths, never the request hot
    /// path.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Execute a batch of commands as one atomic unit.
    ///
    /// Replies come back in command order. Concurrent callers touching
    /// the same key observe batches in some serial order, never
    /// interleaved.
    async fn exec_atomic(&self, commands: Vec<StoreCommand>) -> Result<Vec<StoreReply>, StoreError>;
}

/// Key-value store handle with a configured backend.
pub enum KeyStore {
    /// In-memory backend, for tests and single-process deployments.
    Memory(MemoryStore),
    /// Redis (or Redis-compatible) backend.
    Redis(RedisStore),
}

impl KeyStore {
    /// Construct a store from configuration.
    pub async fn new(config: &StorageConfig) -> Result<Self, StoreError> {
        match config {
            StorageConfig::Memory => Ok(KeyStore::Memory(MemoryStore::new())),
            StorageConfig::Redis(redis_config) => {
                let store = RedisStore::new(redis_config).await?;
                Ok(KeyStore::Redis(store))
            }
        }
    }

    /// Read the raw value stored at `key`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            KeyStore::Memory(store) => store.get(key).await,
            KeyStore::Redis(store) => store.get(key).await,
        }
    }

    /// Store `value` at `key` with a TTL.
    pub async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        match self {
            KeyStore::Memory(store) => store.set_ex(key, value, ttl).await,
            KeyStore::Redis(store) => store.set_ex(key, value, ttl).await,
        }
    }

    /// Store `value` at `key` with a TTL, only if the key does not exist.
    pub async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        match self {
            KeyStore::Memory(store) => store.set_nx_ex(key, value, ttl).await,
            KeyStore::Redis(store) => store.set_nx_ex(key, value, ttl).await,
        }
    }

    /// Delete the given keys, returning how many of them existed.
    pub async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        match self {
            KeyStore::Memory(store) => store.delete(keys).await,
            KeyStore::Redis(store) => store.delete(keys).await,
        }
    }

    /// Atomically increment the integer stored at `key`.
    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        match self {
            KeyStore::Memory(store) => store.incr(key).await,
            KeyStore::Redis(store) => store.incr(key).await,
        }
    }

    /// Set the TTL of `key`.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            KeyStore::Memory(store) => store.expire(key, ttl).await,
            KeyStore::Redis(store) => store.expire(key, ttl).await,
        }
    }

    /// Set the TTL of `key` only if greater than the current one.
    pub async fn expire_gt(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            KeyStore::Memory(store) => store.expire_gt(key, ttl).await,
            KeyStore::Redis(store) => store.expire_gt(key, ttl).await,
        }
    }

    /// Add members to the set stored at `key`.
    pub async fn sadd(&self, key: &str, members: &[String]) -> Result<(), StoreError> {
        match self {
            KeyStore::Memory(store) => store.sadd(key, members).await,
            KeyStore::Redis(store) => store.sadd(key, members).await,
        }
    }

    /// Read all members of the set stored at `key`.
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            KeyStore::Memory(store) => store.smembers(key).await,
            KeyStore::Redis(store) => store.smembers(key).await,
        }
    }

    /// Scan the keyspace for keys matching a glob pattern.
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        match self {
            KeyStore::Memory(store) => store.scan_match(pattern).await,
            KeyStore::Redis(store) => store.scan_match(pattern).await,
        }
    }

    /// Execute a batch of commands as one atomic unit.
    pub async fn exec_atomic(&self, commands: Vec<StoreCommand>) -> Result<Vec<StoreReply>, StoreError> {
        match self {
            KeyStore::Memory(store) => store.exec_atomic(commands).await,
            KeyStore::Redis(store) => store.exec_atomic(commands).await,
        }
    }
}
