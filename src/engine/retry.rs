//! Retry scheduler - per-operation attempt gating
//!
//! Policy (see `EngineConfig`):
//! - At `max_attempts` (default 3) an operation is ineligible forever;
//!   the orchestrator turns it into a dead-letter.
//! - Inside the cool-down window (default 5s since the last attempt) the
//!   operation is skipped for this pass and picked up by a later trigger.
//! - Otherwise eligible. `begin_attempt` increments the counter and
//!   stamps `last_attempt` before the execute runs, so a failure mid-
//!   execution cannot produce a fast retry loop.
//!
//! Metadata is persisted independently of the queue under its own key;
//! the orchestrator writes both once per drain pass.

use super::models::RetryMetadata;
use crate::store::{KeyValueStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Stable persistence key; restart recovery depends on it.
const RETRY_KEY: &str = "sync.retry";

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Attempt now.
    Ready,
    /// Inside the cool-down, skip this pass.
    Wait,
    /// Attempts exhausted, never attempt automatically again.
    Exhausted,
}

/// Attempt counters and cool-downs, keyed by operation id.
pub struct RetryScheduler {
    store: Arc<dyn KeyValueStore>,
    entries: HashMap<String, RetryMetadata>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl RetryScheduler {
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, RetryError> {
        let entries: HashMap<String, RetryMetadata> = match store.get(RETRY_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            store,
            entries,
            max_attempts,
            retry_delay,
        })
    }

    /// Whether the operation may be attempted at `now`.
    pub fn check(&self, id: &str, now: DateTime<Utc>) -> Eligibility {
        let Some(meta) = self.entries.get(id) else {
            return Eligibility::Ready;
        };

        if meta.attempts >= self.max_attempts {
            return Eligibility::Exhausted;
        }

        match meta.last_attempt {
            Some(last) if now - last < self.retry_delay => Eligibility::Wait,
            _ => Eligibility::Ready,
        }
    }

    /// Record that an attempt is about to execute. Must be called before
    /// the execute closure runs.
    pub fn begin_attempt(&mut self, id: &str, now: DateTime<Utc>) -> u32 {
        let meta = self.entries.entry(id.to_string()).or_default();
        meta.attempts += 1;
        meta.last_attempt = Some(now);
        meta.attempts
    }

    /// Drop metadata for an operation that succeeded (or was removed).
    pub fn clear(&mut self, id: &str) {
        self.entries.remove(id);
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.entries.get(id).map(|m| m.attempts).unwrap_or(0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Write the current snapshot to the store.
    pub async fn persist(&self) -> Result<(), RetryError> {
        let raw = serde_json::to_string(&self.entries)?;
        self.store.set(RETRY_KEY, &raw).await?;
        Ok(())
    }

}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn scheduler() -> RetryScheduler {
        RetryScheduler::load(
            Arc::new(MemoryStore::new()),
            3,
            Duration::seconds(5),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_operation_is_ready() {
        let scheduler = scheduler().await;
        assert_eq!(scheduler.check("op-1", Utc::now()), Eligibility::Ready);
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let mut scheduler = scheduler().await;
        let now = Utc::now();

        scheduler.begin_attempt("op-1", now);

        // Inside the 5s window: wait.
        assert_eq!(
            scheduler.check("op-1", now + Duration::seconds(1)),
            Eligibility::Wait
        );
        // After the window: ready again.
        assert_eq!(
            scheduler.check("op-1", now + Duration::seconds(6)),
            Eligibility::Ready
        );
    }

    #[tokio::test]
    async fn test_attempts_increment_before_execution() {
        let mut scheduler = scheduler().await;
        let now = Utc::now();

        assert_eq!(scheduler.begin_attempt("op-1", now), 1);
        assert_eq!(scheduler.begin_attempt("op-1", now), 2);
        assert_eq!(scheduler.attempts("op-1"), 2);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let mut scheduler = scheduler().await;
        let now = Utc::now();

        for _ in 0..3 {
            scheduler.begin_attempt("op-1", now);
        }

        // Even far past the cool-down, an exhausted operation stays dead.
        assert_eq!(
            scheduler.check("op-1", now + Duration::hours(1)),
            Eligibility::Exhausted
        );
    }

    #[tokio::test]
    async fn test_clear_on_success() {
        let mut scheduler = scheduler().await;
        scheduler.begin_attempt("op-1", Utc::now());

        scheduler.clear("op-1");
        assert_eq!(scheduler.attempts("op-1"), 0);
        assert_eq!(scheduler.check("op-1", Utc::now()), Eligibility::Ready);
    }

    #[tokio::test]
    async fn test_metadata_survives_reload() {
        let store = Arc::new(MemoryStore::new());
        let mut scheduler =
            RetryScheduler::load(store.clone(), 3, Duration::seconds(5))
                .await
                .unwrap();

        scheduler.begin_attempt("op-1", Utc::now());
        scheduler.begin_attempt("op-1", Utc::now());
        scheduler.persist().await.unwrap();

        let reloaded = RetryScheduler::load(store, 3, Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(reloaded.attempts("op-1"), 2);
    }
}
