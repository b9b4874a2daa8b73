//! Commands and replies for atomic multi-command batches.

use std::time::Duration;

/// A single command inside an atomic batch.
///
/// The variants cover exactly what a sliding-window update needs to run
/// as one prune-count-add-expire unit against the store.
#[derive(Debug, Clone)]
pub enum StoreCommand {
    /// Set the TTL of a key.
    Expire {
        /// Target key.
        key: String,
        /// Time to live.
        ttl: Duration,
    },
    /// Add a member to a sorted set with the given score.
    ZAdd {
        /// Sorted-set key.
        key: String,
        /// Member score (milliseconds timestamp for window keys).
        score: f64,
        /// Member identity.
        member: String,
    },
    /// Remove sorted-set members with scores inside `[min, max]`.
    ZRemRangeByScore {
        /// Sorted-set key.
        key: String,
        /// Inclusive lower score bound.
        min: f64,
        /// Inclusive upper score bound.
        max: f64,
    },
    /// Count the members of a sorted set.
    ZCard {
        /// Sorted-set key.
        key: String,
    },
    /// Read all members of a sorted set in score order.
    ZRange {
        /// Sorted-set key.
        key: String,
    },
}

/// Reply to a single command of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    /// Command completed without a meaningful return value.
    Unit,
    /// Integer reply (cardinality, removal count, ...).
    Int(i64),
    /// Sorted-set members.
    Members(Vec<String>),
}

impl StoreReply {
    /// Read this reply as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StoreReply::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Read this reply as a member list.
    pub fn as_members(&self) -> Option<&[String]> {
        match self {
            StoreReply::Members(members) => Some(members),
            _ => None,
        }
    }
}
