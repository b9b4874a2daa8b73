//! Tag index: sets mapping a tag name to the cache keys carrying it.

use std::sync::Arc;
use std::time::Duration;

use keystore::{KeyStore, StoreError};

pub(crate) struct TagIndex {
    store: Arc<KeyStore>,
}

fn tag_key(tag: &str) -> String {
    format!("tag:{tag}")
}

impl TagIndex {
    pub(crate) fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// Record `key` under each tag and keep every tag set alive at least
    /// as long as the entry. The TTL only ever extends, so a tag set
    /// shared with longer-lived entries is never cut short.
    pub(crate) async fn attach(&self, key: &str, tags: &[String], ttl: Duration) -> Result<(), StoreError> {
        for tag in tags {
            let tag_key = tag_key(tag);
            self.store.sadd(&tag_key, &[key.to_string()]).await?;
            self.store.expire_gt(&tag_key, ttl).await?;
        }

        Ok(())
    }

    pub(crate) async fn members(&self, tag: &str) -> Result<Vec<String>, StoreError> {
        self.store.smembers(&tag_key(tag)).await
    }

    pub(crate) async fn remove(&self, tag: &str) -> Result<(), StoreError> {
        self.store.delete(&[tag_key(tag)]).await?;
        Ok(())
    }
}
