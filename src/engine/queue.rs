//! Operation queue - ordered, persisted list of pending mutations
//!
//! Invariants:
//! - Total order: (priority, enqueued_at), stable. High-priority,
//!   earlier-enqueued work always drains first.
//! - Exactly one operation per id; a duplicate enqueue is rejected.
//! - Persisted as one JSON snapshot after every structural change outside
//!   a drain pass; during a pass the orchestrator persists once at the end.
//! - On reload, stale `is_processing` flags from a crashed run are reset
//!   so no operation is silently stuck.
//!
//! Execute closures are deliberately not part of the persisted record:
//! the caller re-binds them after a restart (`bind_executor`).

use super::models::{
    OperationDraft, OperationStatus, PendingOperation, QueueStatus,
};
use crate::remote::ExecuteFn;
use crate::store::{KeyValueStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Stable persistence key; restart recovery depends on it.
const QUEUE_KEY: &str = "sync.queue";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation already queued: {0}")]
    DuplicateOperation(String),

    #[error("Operation not found: {0}")]
    NotFound(String),
}

/// Ordered, persisted queue of pending mutations plus the session-local
/// executor bindings.
pub struct OperationQueue {
    store: Arc<dyn KeyValueStore>,
    ops: Vec<PendingOperation>,
    executors: HashMap<String, ExecuteFn>,
}

impl OperationQueue {
    /// Load the persisted queue, recovering from a crash mid-attempt by
    /// resetting any `is_processing` flags left behind.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, QueueError> {
        let mut ops: Vec<PendingOperation> = match store.get(QUEUE_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };

        let mut recovered = 0;
        for op in ops.iter_mut() {
            if op.is_processing {
                op.is_processing = false;
                recovered += 1;
            }
        }

        let queue = Self {
            store,
            ops,
            executors: HashMap::new(),
        };

        if recovered > 0 {
            log::warn!(
                "Recovered {} operation(s) left in-flight by a previous run",
                recovered
            );
            queue.persist().await?;
        }

        if !queue.ops.is_empty() {
            log::info!("Loaded {} pending operation(s) from store", queue.ops.len());
        }

        Ok(queue)
    }

    /// Append a new operation and re-sort the queue. Assigns a UUID when
    /// the draft carries no id. Persists the new snapshot before returning.
    pub async fn enqueue(
        &mut self,
        draft: OperationDraft,
        execute: Option<ExecuteFn>,
    ) -> Result<String, QueueError> {
        let id = draft
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if self.ops.iter().any(|op| op.id == id) {
            return Err(QueueError::DuplicateOperation(id));
        }

        let op = PendingOperation {
            id: id.clone(),
            kind: draft.kind,
            collection: draft.collection,
            document_id: draft.document_id,
            payload: draft.payload,
            priority: draft.priority,
            enqueued_at: Utc::now(),
            is_processing: false,
            status: OperationStatus::Pending,
            last_error: None,
        };

        log::info!(
            "Queued {} on {}/{} (priority: {}, id: {})",
            op.kind.as_str(),
            op.collection,
            op.document_id,
            op.priority.as_str(),
            id
        );

        self.ops.push(op);
        // Stable sort keeps enqueue order within equal (priority, timestamp).
        self.ops
            .sort_by_key(|op| (op.priority, op.enqueued_at));

        if let Some(execute) = execute {
            self.executors.insert(id.clone(), execute);
        }

        self.persist().await?;
        Ok(id)
    }

    /// Attach (or replace) the execute closure for a reloaded operation.
    pub fn bind_executor(&mut self, id: &str, execute: ExecuteFn) -> Result<(), QueueError> {
        if !self.ops.iter().any(|op| op.id == id) {
            return Err(QueueError::NotFound(id.to_string()));
        }
        self.executors.insert(id.to_string(), execute);
        Ok(())
    }

    pub fn executor(&self, id: &str) -> Option<&ExecuteFn> {
        self.executors.get(id)
    }

    pub fn get(&self, id: &str) -> Option<&PendingOperation> {
        self.ops.iter().find(|op| op.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PendingOperation> {
        self.ops.iter_mut().find(|op| op.id == id)
    }

    /// Ids of all operations in drain order, snapshot semantics:
    /// operations enqueued after this call are not part of the pass.
    pub fn snapshot(&self) -> Vec<String> {
        self.ops.iter().map(|op| op.id.clone()).collect()
    }

    /// Drop an operation and its executor binding. Does not persist;
    /// callers decide when the snapshot hits the store.
    pub fn remove(&mut self, id: &str) -> Option<PendingOperation> {
        let index = self.ops.iter().position(|op| op.id == id)?;
        self.executors.remove(id);
        Some(self.ops.remove(index))
    }

    /// Dead-letter operations, for manual inspection.
    pub fn failed(&self) -> Vec<&PendingOperation> {
        self.ops
            .iter()
            .filter(|op| op.status == OperationStatus::Failed)
            .collect()
    }

    /// Reset every dead-letter back to pending so the next drain retries
    /// it. Returns the ids that were reset. Persists when any changed.
    pub async fn reset_failed(&mut self) -> Result<Vec<String>, QueueError> {
        let mut reset = Vec::new();
        for op in self.ops.iter_mut() {
            if op.status == OperationStatus::Failed {
                op.status = OperationStatus::Pending;
                op.last_error = None;
                reset.push(op.id.clone());
            }
        }
        if !reset.is_empty() {
            log::info!("Reset {} failed operation(s) for retry", reset.len());
            self.persist().await?;
        }
        Ok(reset)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn status(&self, last_processed: Option<DateTime<Utc>>) -> QueueStatus {
        let processing = self.ops.iter().filter(|op| op.is_processing).count();
        let failed = self
            .ops
            .iter()
            .filter(|op| op.status == OperationStatus::Failed)
            .count();
        QueueStatus {
            pending: self.ops.len() - processing - failed,
            processing,
            failed,
            last_processed,
        }
    }

    /// Write the current snapshot to the store, overwriting the previous
    /// one.
    pub async fn persist(&self) -> Result<(), QueueError> {
        let raw = serde_json::to_string(&self.ops)?;
        self.store.set(QUEUE_KEY, &raw).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{OperationKind, OperationPriority};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn draft(collection: &str, doc: &str, priority: OperationPriority) -> OperationDraft {
        OperationDraft::new(OperationKind::Update, collection, doc, json!({}))
            .with_priority(priority)
    }

    async fn empty_queue() -> OperationQueue {
        OperationQueue::load(Arc::new(MemoryStore::new())).await.unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_assigns_id_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = OperationQueue::load(store.clone()).await.unwrap();

        let id = queue
            .enqueue(draft("props", "p1", OperationPriority::Normal), None)
            .await
            .unwrap();
        assert!(!id.is_empty());

        // A fresh load sees the persisted operation.
        let reloaded = OperationQueue::load(store).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(&id).is_some());
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let mut queue = empty_queue().await;

        let low = queue
            .enqueue(draft("tasks", "a", OperationPriority::Low), None)
            .await
            .unwrap();
        let high = queue
            .enqueue(draft("tasks", "b", OperationPriority::High), None)
            .await
            .unwrap();
        let normal = queue
            .enqueue(draft("tasks", "c", OperationPriority::Normal), None)
            .await
            .unwrap();

        assert_eq!(queue.snapshot(), vec![high, normal, low]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_enqueue_order() {
        let mut queue = empty_queue().await;

        let first = queue
            .enqueue(draft("shows", "a", OperationPriority::Normal), None)
            .await
            .unwrap();
        let second = queue
            .enqueue(draft("shows", "b", OperationPriority::Normal), None)
            .await
            .unwrap();

        assert_eq!(queue.snapshot(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let mut queue = empty_queue().await;

        queue
            .enqueue(
                draft("props", "p1", OperationPriority::Normal).with_id("op-1"),
                None,
            )
            .await
            .unwrap();

        let result = queue
            .enqueue(
                draft("props", "p2", OperationPriority::Normal).with_id("op-1"),
                None,
            )
            .await;
        assert!(matches!(result, Err(QueueError::DuplicateOperation(_))));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_resets_in_flight_flag() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = OperationQueue::load(store.clone()).await.unwrap();

        let id = queue
            .enqueue(draft("props", "p1", OperationPriority::Normal), None)
            .await
            .unwrap();
        queue.get_mut(&id).unwrap().is_processing = true;
        queue.persist().await.unwrap();

        // Simulated restart: the flag must come back reset.
        let reloaded = OperationQueue::load(store).await.unwrap();
        assert!(!reloaded.get(&id).unwrap().is_processing);
    }

    #[tokio::test]
    async fn test_executor_binding_survives_only_in_memory() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = OperationQueue::load(store.clone()).await.unwrap();

        let id = queue
            .enqueue(
                draft("props", "p1", OperationPriority::Normal),
                Some(Box::new(|| Box::pin(async { Ok(()) }))),
            )
            .await
            .unwrap();
        assert!(queue.executor(&id).is_some());

        let mut reloaded = OperationQueue::load(store).await.unwrap();
        assert!(reloaded.executor(&id).is_none());

        reloaded
            .bind_executor(&id, Box::new(|| Box::pin(async { Ok(()) })))
            .unwrap();
        assert!(reloaded.executor(&id).is_some());
    }

    #[tokio::test]
    async fn test_bind_executor_unknown_id() {
        let mut queue = empty_queue().await;
        let result = queue.bind_executor("missing", Box::new(|| Box::pin(async { Ok(()) })));
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_counts() {
        let mut queue = empty_queue().await;

        let a = queue
            .enqueue(draft("props", "a", OperationPriority::Normal), None)
            .await
            .unwrap();
        let b = queue
            .enqueue(draft("props", "b", OperationPriority::Normal), None)
            .await
            .unwrap();
        queue
            .enqueue(draft("props", "c", OperationPriority::Normal), None)
            .await
            .unwrap();

        queue.get_mut(&a).unwrap().is_processing = true;
        queue.get_mut(&b).unwrap().status = OperationStatus::Failed;

        let status = queue.status(None);
        assert_eq!(status.processing, 1);
        assert_eq!(status.pending, 1);
        assert_eq!(status.failed, 1);
    }

    #[tokio::test]
    async fn test_reset_failed() {
        let mut queue = empty_queue().await;

        let id = queue
            .enqueue(draft("props", "a", OperationPriority::Normal), None)
            .await
            .unwrap();
        {
            let op = queue.get_mut(&id).unwrap();
            op.status = OperationStatus::Failed;
            op.last_error = Some("remote write rejected".to_string());
        }

        let reset = queue.reset_failed().await.unwrap();
        assert_eq!(reset, vec![id.clone()]);

        let op = queue.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(op.last_error.is_none());
    }
}
