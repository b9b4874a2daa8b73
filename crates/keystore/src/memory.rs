//! In-memory store backend.
//!
//! Reproduces the store semantics the subsystem relies on (TTLs, sorted
//! sets, sets, atomic batches) without a network. Used by tests and by
//! single-process deployments that do not need shared limits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::command::{StoreCommand, StoreReply};
use crate::error::StoreError;
use crate::StoreBackend;

/// Stored value shapes.
enum Value {
    Blob(Vec<u8>),
    Zset(Vec<(f64, String)>),
    Set(Vec<String>),
}

struct Entry {
    value: Value,
    /// Expiry as milliseconds since the Unix epoch; `None` means no TTL.
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }
}

/// In-memory store backend.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    outage: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            outage: AtomicBool::new(false),
        }
    }

    /// Simulate a store outage.
    ///
    /// While enabled, every operation fails with a connection error.
    /// Lets callers exercise their fail-open paths without a network.
    pub fn simulate_outage(&self, enabled: bool) {
        self.outage.store(enabled, Ordering::Relaxed);
    }

    fn check_outage(&self) -> Result<(), StoreError> {
        if self.outage.load(Ordering::Relaxed) {
            return Err(StoreError::Connection("simulated outage".to_string()));
        }
        Ok(())
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn expiry(ttl: Duration) -> Option<u64> {
        Some(Self::now_ms() + ttl.as_millis() as u64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up a live entry, dropping it when its TTL has passed.
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now_ms: u64) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now_ms)) {
        entries.remove(key);
        return None;
    }

    entries.get_mut(key)
}

fn apply(
    entries: &mut HashMap<String, Entry>,
    command: &StoreCommand,
    now_ms: u64,
) -> Result<StoreReply, StoreError> {
    match command {
        StoreCommand::Expire { key, ttl } => {
            if let Some(entry) = live_entry(entries, key, now_ms) {
                entry.expires_at = Some(now_ms + ttl.as_millis() as u64);
            }
            Ok(StoreReply::Unit)
        }
        StoreCommand::ZAdd { key, score, member } => {
            let entry = match live_entry(entries, key, now_ms) {
                Some(entry) => entry,
                None => {
                    entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Zset(Vec::new()),
                            expires_at: None,
                        },
                    );
                    entries.get_mut(key).ok_or_else(|| {
                        StoreError::UnexpectedReply("entry vanished during ZADD".to_string())
                    })?
                }
            };

            let Value::Zset(members) = &mut entry.value else {
                return Err(StoreError::Query(format!("key {key} holds a non-zset value")));
            };

            members.retain(|(_, m)| m != member);
            let at = members.partition_point(|(s, _)| *s <= *score);
            members.insert(at, (*score, member.clone()));
            Ok(StoreReply::Unit)
        }
        StoreCommand::ZRemRangeByScore { key, min, max } => {
            let Some(entry) = live_entry(entries, key, now_ms) else {
                return Ok(StoreReply::Int(0));
            };

            let Value::Zset(members) = &mut entry.value else {
                return Err(StoreError::Query(format!("key {key} holds a non-zset value")));
            };

            let before = members.len();
            members.retain(|(score, _)| *score < *min || *score > *max);
            Ok(StoreReply::Int((before - members.len()) as i64))
        }
        StoreCommand::ZCard { key } => {
            let Some(entry) = live_entry(entries, key, now_ms) else {
                return Ok(StoreReply::Int(0));
            };

            let Value::Zset(members) = &entry.value else {
                return Err(StoreError::Query(format!("key {key} holds a non-zset value")));
            };

            Ok(StoreReply::Int(members.len() as i64))
        }
        StoreCommand::ZRange { key } => {
            let Some(entry) = live_entry(entries, key, now_ms) else {
                return Ok(StoreReply::Members(Vec::new()));
            };

            let Value::Zset(members) = &entry.value else {
                return Err(StoreError::Query(format!("key {key} holds a non-zset value")));
            };

            Ok(StoreReply::Members(members.iter().map(|(_, m)| m.clone()).collect()))
        }
    }
}

impl StoreBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;

        match live_entry(&mut entries, key, Self::now_ms()) {
            Some(entry) => match &entry.value {
                Value::Blob(bytes) => Ok(Some(bytes.clone())),
                _ => Err(StoreError::Query(format!("key {key} holds a non-string value"))),
            },
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Blob(value.to_vec()),
                expires_at: Self::expiry(ttl),
            },
        );

        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;

        if live_entry(&mut entries, key, Self::now_ms()).is_some() {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Blob(value.to_vec()),
                expires_at: Self::expiry(ttl),
            },
        );

        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;
        let now_ms = Self::now_ms();

        let mut removed = 0;
        for key in keys {
            if live_entry(&mut entries, key, now_ms).is_some() && entries.remove(key).is_some() {
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;
        let now_ms = Self::now_ms();

        let current = match live_entry(&mut entries, key, now_ms) {
            Some(entry) => {
                let Value::Blob(bytes) = &entry.value else {
                    return Err(StoreError::Query(format!("key {key} holds a non-string value")));
                };

                std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| StoreError::Query(format!("key {key} is not an integer")))?
            }
            None => 0,
        };

        let next = current + 1;
        let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Blob(next.to_string().into_bytes()),
                expires_at,
            },
        );

        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;

        if let Some(entry) = live_entry(&mut entries, key, Self::now_ms()) {
            entry.expires_at = Self::expiry(ttl);
        }

        Ok(())
    }

    async fn expire_gt(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;

        if let Some(entry) = live_entry(&mut entries, key, Self::now_ms()) {
            let candidate = Self::expiry(ttl);
            match entry.expires_at {
                Some(current) if candidate.is_some_and(|c| c <= current) => {}
                _ => entry.expires_at = candidate,
            }
        }

        Ok(())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<(), StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;
        let now_ms = Self::now_ms();

        let entry = match live_entry(&mut entries, key, now_ms) {
            Some(entry) => entry,
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(Vec::new()),
                        expires_at: None,
                    },
                );
                entries.get_mut(key).ok_or_else(|| {
                    StoreError::UnexpectedReply("entry vanished during SADD".to_string())
                })?
            }
        };

        let Value::Set(existing) = &mut entry.value else {
            return Err(StoreError::Query(format!("key {key} holds a non-set value")));
        };

        for member in members {
            if !existing.contains(member) {
                existing.push(member.clone());
            }
        }

        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;

        match live_entry(&mut entries, key, Self::now_ms()) {
            Some(entry) => {
                let Value::Set(members) = &entry.value else {
                    return Err(StoreError::Query(format!("key {key} holds a non-set value")));
                };
                Ok(members.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check_outage()?;
        let entries = self.entries.lock().await;
        let now_ms = Self::now_ms();

        Ok(entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now_ms) && fast_glob::glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn exec_atomic(&self, commands: Vec<StoreCommand>) -> Result<Vec<StoreReply>, StoreError> {
        self.check_outage()?;
        let mut entries = self.entries.lock().await;
        let now_ms = Self::now_ms();

        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            replies.push(apply(&mut entries, command, now_ms)?);
        }

        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = MemoryStore::new();

        store.set_ex("k", b"hello", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_lazily() {
        let store = MemoryStore::new();

        store.set_ex("k", b"v", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_respects_existing_keys() {
        let store = MemoryStore::new();

        assert!(store.set_nx_ex("k", b"a", Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_nx_ex("k", b"b", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn incr_creates_and_counts() {
        let store = MemoryStore::new();

        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        assert_eq!(store.get("counter").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn delete_counts_only_existing_keys() {
        let store = MemoryStore::new();

        store.set_ex("a", b"1", Duration::from_secs(60)).await.unwrap();
        store.set_ex("b", b"2", Duration::from_secs(60)).await.unwrap();

        let removed = store
            .delete(&["a".to_string(), "b".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn expire_gt_only_extends() {
        let store = MemoryStore::new();

        store.set_ex("k", b"v", Duration::from_secs(300)).await.unwrap();
        store.expire_gt("k", Duration::from_secs(1)).await.unwrap();

        // Still alive well past the shorter TTL candidate.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        // A key without a TTL accepts the first candidate.
        store.sadd("tagged", &["member".to_string()]).await.unwrap();
        store.expire_gt("tagged", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.smembers("tagged").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_match_filters_by_glob() {
        let store = MemoryStore::new();

        store.set_ex("class:1", b"a", Duration::from_secs(60)).await.unwrap();
        store.set_ex("class:2", b"b", Duration::from_secs(60)).await.unwrap();
        store.set_ex("user:1", b"c", Duration::from_secs(60)).await.unwrap();

        let mut keys = store.scan_match("class:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["class:1".to_string(), "class:2".to_string()]);
    }

    #[tokio::test]
    async fn atomic_batch_prunes_counts_and_adds() {
        let store = MemoryStore::new();

        // Seed three members at scores 10, 20, 30.
        for (score, member) in [(10.0, "a"), (20.0, "b"), (30.0, "c")] {
            store
                .exec_atomic(vec![StoreCommand::ZAdd {
                    key: "w".to_string(),
                    score,
                    member: member.to_string(),
                }])
                .await
                .unwrap();
        }

        let replies = store
            .exec_atomic(vec![
                StoreCommand::ZRemRangeByScore {
                    key: "w".to_string(),
                    min: 0.0,
                    max: 15.0,
                },
                StoreCommand::ZCard { key: "w".to_string() },
                StoreCommand::ZAdd {
                    key: "w".to_string(),
                    score: 40.0,
                    member: "d".to_string(),
                },
                StoreCommand::Expire {
                    key: "w".to_string(),
                    ttl: Duration::from_secs(60),
                },
            ])
            .await
            .unwrap();

        assert_eq!(replies[0], StoreReply::Int(1));
        // Count taken before the new member was added.
        assert_eq!(replies[1], StoreReply::Int(2));

        let replies = store
            .exec_atomic(vec![StoreCommand::ZRange { key: "w".to_string() }])
            .await
            .unwrap();
        assert_eq!(
            replies[0].as_members().unwrap(),
            &["b".to_string(), "c".to_string(), "d".to_string()]
        );
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_ex("k", b"v", Duration::from_secs(60)).await.unwrap();

        store.simulate_outage(true);
        assert!(matches!(store.get("k").await, Err(StoreError::Connection(_))));
        assert!(store.exec_atomic(vec![StoreCommand::ZCard { key: "w".into() }]).await.is_err());

        store.simulate_outage(false);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
