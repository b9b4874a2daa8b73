//! Cache-aside storage over a shared key-value store.
//!
//! Values are JSON-serialized with a TTL, optionally grouped under tags
//! for group invalidation. The cache is an accelerator, never a source
//! of truth: every store failure degrades to a miss and the caller
//! recomputes, so an unavailable store slows the service down instead
//! of breaking it.

#![deny(missing_docs)]

mod store;
mod tags;

pub use store::{CacheOptions, CacheStore};
