//! Document cache - TTL-bounded local mirror of remote documents
//!
//! Keyed by collection + document id, persisted through the key-value
//! store as one JSON map per collection (`cache.<collection>`). Staleness
//! is evaluated lazily on read; a stale entry is treated as absent and
//! evicted in place. A miss is not an error, the caller decides whether
//! to re-fetch.

use super::models::CachedEntry;
use crate::store::{KeyValueStore, StoreError};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn collection_key(collection: &str) -> String {
    format!("cache.{}", collection)
}

/// TTL-bounded read cache over the durable store.
pub struct DocumentCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl DocumentCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    async fn load_collection(
        &self,
        collection: &str,
    ) -> Result<HashMap<String, CachedEntry>, CacheError> {
        match self.store.get(&collection_key(collection)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(HashMap::new()),
        }
    }

    async fn save_collection(
        &self,
        collection: &str,
        entries: &HashMap<String, CachedEntry>,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(entries)?;
        self.store.set(&collection_key(collection), &raw).await?;
        Ok(())
    }

    /// Store a document, stamped with the current time. Overwrites any
    /// previous entry for the same id.
    pub async fn put(
        &self,
        collection: &str,
        id: &str,
        data: serde_json::Value,
    ) -> Result<(), CacheError> {
        let mut entries = self.load_collection(collection).await?;
        entries.insert(id.to_string(), CachedEntry::new(data));
        self.save_collection(collection, &entries).await
    }

    /// The cached document, or `None` when missing or older than the TTL.
    /// A stale hit is evicted before returning.
    pub async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        let mut entries = self.load_collection(collection).await?;
        let Some(entry) = entries.get(id) else {
            return Ok(None);
        };

        if entry.is_fresh(Utc::now(), self.ttl) {
            return Ok(Some(entry.data.clone()));
        }

        log::debug!("Evicting stale cache entry {}/{}", collection, id);
        entries.remove(id);
        self.save_collection(collection, &entries).await?;
        Ok(None)
    }

    /// Remove every entry for the given collections.
    pub async fn clear(&self, collections: &[String]) -> Result<(), CacheError> {
        for collection in collections {
            self.store.remove(&collection_key(collection)).await?;
        }
        log::info!("Cleared document cache for {} collection(s)", collections.len());
        Ok(())
    }

    #[cfg(test)]
    pub async fn backdate(
        &self,
        collection: &str,
        id: &str,
        cached_at: chrono::DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut entries = self.load_collection(collection).await?;
        if let Some(entry) = entries.get_mut(id) {
            entry.cached_at = cached_at;
        }
        self.save_collection(collection, &entries).await
    }
}

// ============================================================================
// Tests
// ============================================================================
