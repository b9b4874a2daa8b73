//! Sliding-window counters backed by store sorted sets.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use keystore::{KeyStore, StoreCommand, StoreError, StoreReply};

/// Counter for events within a trailing time window.
///
/// Each window is a sorted set whose members are unique per-event tokens
/// scored by their millisecond timestamp. Updates run as one atomic batch
/// against the store: prune expired members, measure, add the new event,
/// refresh the key TTL. Concurrent callers on the same key therefore
/// never race between the measure and the add.
#[derive(Clone)]
pub struct SlidingWindow {
    store: Arc<KeyStore>,
}

/// Outcome of a window update.
#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    /// Count (or weight sum) of live members measured *before* the new
    /// event was added, so the new event never counts against itself.
    pub prior: u64,
    /// Timestamp the event was recorded at, milliseconds since epoch.
    pub recorded_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Upper prune bound: everything strictly older than the window start.
fn prune_bound(now: u64, window: Duration) -> f64 {
    let window_start = now.saturating_sub(window.as_millis() as u64);
    window_start.saturating_sub(1) as f64
}

/// Weighted members carry their cost in the member identity, after the
/// last colon.
fn member_weight(member: &str) -> u64 {
    member
        .rsplit_once(':')
        .and_then(|(_, weight)| weight.parse().ok())
        .unwrap_or(0)
}

impl SlidingWindow {
    /// Create a counter over the given store.
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// Record one unit event and return the pre-increment count.
    pub async fn record(&self, key: &str, window: Duration) -> Result<WindowSample, StoreError> {
        let now = now_ms();
        let member = uuid::Uuid::new_v4().to_string();

        let replies = self
            .store
            .exec_atomic(vec![
                StoreCommand::ZRemRangeByScore {
                    key: key.to_string(),
                    min: 0.0,
                    max: prune_bound(now, window),
                },
                StoreCommand::ZCard { key: key.to_string() },
                StoreCommand::ZAdd {
                    key: key.to_string(),
                    score: now as f64,
                    member,
                },
                StoreCommand::Expire {
                    key: key.to_string(),
                    ttl: window,
                },
            ])
            .await?;

        let prior = replies
            .get(1)
            .and_then(StoreReply::as_int)
            .ok_or_else(|| StoreError::UnexpectedReply("missing cardinality reply".to_string()))?;

        Ok(WindowSample {
            prior: prior as u64,
            recorded_at_ms: now,
        })
    }

    /// Prune the window and return the current sum of member weights,
    /// without recording anything.
    pub async fn weigh(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = now_ms();

        let replies = self
            .store
            .exec_atomic(vec![
                StoreCommand::ZRemRangeByScore {
                    key: key.to_string(),
                    min: 0.0,
                    max: prune_bound(now, window),
                },
                StoreCommand::ZRange { key: key.to_string() },
            ])
            .await?;

        let members = replies
            .get(1)
            .and_then(StoreReply::as_members)
            .ok_or_else(|| StoreError::UnexpectedReply("missing member reply".to_string()))?;

        Ok(members.iter().map(|member| member_weight(member)).sum())
    }

    /// Record a weighted event and refresh the window key TTL.
    pub async fn add_weight(&self, key: &str, window: Duration, weight: u64) -> Result<(), StoreError> {
        let now = now_ms();
        let member = format!("{}:{weight}", uuid::Uuid::new_v4());

        self.store
            .exec_atomic(vec![
                StoreCommand::ZAdd {
                    key: key.to_string(),
                    score: now as f64,
                    member,
                },
                StoreCommand::Expire {
                    key: key.to_string(),
                    ttl: window,
                },
            ])
            .await?;

        Ok(())
    }
}
