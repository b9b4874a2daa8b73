//! The cache-aside store.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use keystore::KeyStore;

use crate::tags::TagIndex;

/// How long a fetch marker key lives. Bounds the damage of a holder that
/// dies mid-fetch: waiters fall back to their own fetch once the marker
/// expires.
const INFLIGHT_TTL: Duration = Duration::from_secs(5);

/// How waiters poll the cache while another caller's fetch is in flight.
const INFLIGHT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const INFLIGHT_POLL_ATTEMPTS: u32 = 10;

/// Per-entry write options.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Entry lifetime.
    pub ttl: Duration,
    /// Tags the entry is grouped under for group invalidation.
    pub tags: Vec<String>,
    /// Suppress duplicate concurrent fetches for the same key in
    /// `get_or_set`.
    pub single_flight: bool,
}

impl CacheOptions {
    /// Options with the given TTL, no tags, no single-flight.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tags: Vec::new(),
            single_flight: false,
        }
    }

    /// Group the entry under the given tags.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Enable single-flight fetching for this entry.
    pub fn with_single_flight(mut self) -> Self {
        self.single_flight = true;
        self
    }
}

/// Cache-aside store over a shared key-value store.
///
/// Cheap to clone. All errors from the store or from serialization are
/// absorbed: reads degrade to misses, writes to no-ops, and the caller
/// never has to handle a cache failure.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<KeyStore>,
}

impl CacheStore {
    /// Create a cache over the given store.
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    fn tags(&self) -> TagIndex {
        TagIndex::new(self.store.clone())
    }

    /// Read a cached value. Absent keys, store errors and values that no
    /// longer deserialize are all misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("cache read failed for key {key}, treating as miss: {e}");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("cached value for key {key} no longer deserializes, treating as miss: {e}");
                None
            }
        }
    }

    /// Write a value with a TTL and register its tags. Returns whether
    /// the value was stored; the caller proceeds with its in-memory
    /// value either way.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: &CacheOptions) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to serialize cache value for key {key}: {e}");
                return false;
            }
        };

        if let Err(e) = self.store.set_ex(key, &bytes, options.ttl).await {
            log::warn!("cache write failed for key {key}: {e}");
            return false;
        }

        if let Err(e) = self.tags().attach(key, &options.tags, options.ttl).await {
            // The entry itself is cached; only group invalidation may
            // miss it until it expires on its own.
            log::warn!("failed to tag cache key {key}: {e}");
        }

        true
    }

    /// Read-through: return the cached value, or fetch, cache and return
    /// it. Fetch errors propagate; store errors never do.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, options: &CacheOptions, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let mut claimed = false;

        if options.single_flight {
            claimed = self.claim_fetch(key).await;

            if !claimed {
                // Someone else is fetching. Wait for their write to
                // land, then fall back to our own fetch rather than
                // wait forever. The marker stays theirs to release.
                for _ in 0..INFLIGHT_POLL_ATTEMPTS {
                    tokio::time::sleep(INFLIGHT_POLL_INTERVAL).await;

                    if let Some(value) = self.get(key).await {
                        return Ok(value);
                    }
                }
            }
        }

        let value = match fetch().await {
            Ok(value) => value,
            Err(e) => {
                if claimed {
                    self.release_fetch(key).await;
                }
                return Err(e);
            }
        };

        self.set(key, &value, options).await;

        if claimed {
            self.release_fetch(key).await;
        }

        Ok(value)
    }

    /// Remove one entry. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        match self.store.delete(&[key.to_string()]).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                log::warn!("cache delete failed for key {key}: {e}");
                false
            }
        }
    }

    /// Remove every entry carrying the tag, and the tag set itself.
    /// Returns the number of entries that actually existed; members that
    /// already expired on their own don't count.
    pub async fn invalidate_by_tag(&self, tag: &str) -> u64 {
        let tags = self.tags();

        let members = match tags.members(tag).await {
            Ok(members) => members,
            Err(e) => {
                log::warn!("tag invalidation failed for tag {tag}: {e}");
                return 0;
            }
        };

        if members.is_empty() {
            return 0;
        }

        let removed = match self.store.delete(&members).await {
            Ok(removed) => removed,
            Err(e) => {
                log::warn!("tag invalidation failed for tag {tag}: {e}");
                return 0;
            }
        };

        if let Err(e) = tags.remove(tag).await {
            log::warn!("failed to drop tag set for tag {tag}: {e}");
        }

        removed
    }

    /// Remove every entry whose key matches the glob pattern. Walks the
    /// keyspace with SCAN; a maintenance path, not an O(1) operation.
    pub async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let keys = match self.store.scan_match(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("pattern delete failed for pattern {pattern}: {e}");
                return 0;
            }
        };

        if keys.is_empty() {
            return 0;
        }

        match self.store.delete(&keys).await {
            Ok(removed) => removed,
            Err(e) => {
                log::warn!("pattern delete failed for pattern {pattern}: {e}");
                0
            }
        }
    }

    /// Try to become the fetcher for a key. Failure to reach the store
    /// counts as a claim so the caller just fetches itself.
    async fn claim_fetch(&self, key: &str) -> bool {
        let marker = format!("inflight:{key}");

        match self.store.set_nx_ex(&marker, b"1", INFLIGHT_TTL).await {
            Ok(claimed) => claimed,
            Err(e) => {
                log::warn!("fetch claim failed for key {key}, fetching anyway: {e}");
                true
            }
        }
    }

    async fn release_fetch(&self, key: &str) {
        let marker = format!("inflight:{key}");

        if let Err(e) = self.store.delete(&[marker]).await {
            log::warn!("failed to release fetch claim for key {key}: {e}");
        }
    }
}
