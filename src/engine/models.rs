//! Sync engine data models
//!
//! Everything the engine persists or exposes:
//! - PendingOperation: one queued mutation awaiting remote execution
//! - RetryMetadata: per-operation attempt bookkeeping
//! - CachedEntry: one TTL-bounded local mirror of a remote document
//! - SyncMetadata: engine-wide watermark and tracked collections
//! - SyncStatus / QueueStatus: read-only views for the embedding app

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Engine configuration
// ============================================================================

/// Engine tuning knobs. Defaults match the Callboard deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum execution attempts before an operation becomes a dead-letter.
    pub max_attempts: u32,

    /// Cool-down between attempts of the same operation.
    pub retry_delay: Duration,

    /// Age after which a cached document is treated as absent.
    pub cache_ttl: Duration,

    /// Collections subject to incremental sync, in sync order.
    pub tracked_collections: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::seconds(5),
            cache_ttl: Duration::hours(24),
            tracked_collections: vec![
                "shows".to_string(),
                "props".to_string(),
                "venues".to_string(),
                "tasks".to_string(),
                "shopping_items".to_string(),
            ],
        }
    }
}

// ============================================================================
// Pending operations
// ============================================================================

/// Mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Drain priority. The derived `Ord` gives High < Normal < Low, which is
/// exactly the drain order: lower values drain first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OperationPriority {
    High,
    Normal,
    Low,
}

impl OperationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

/// Operation lifecycle status. `Failed` marks a dead-letter: retained in
/// the queue for inspection, never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Failed,
}

/// One queued mutation. This is the persisted record; the execute closure
/// that performs the actual remote write lives outside it and is re-bound
/// per session (closures cannot survive a restart).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique id, stable across persistence reloads.
    pub id: String,

    pub kind: OperationKind,

    /// Target collection and document id.
    pub collection: String,
    pub document_id: String,

    /// Opaque mutation payload.
    pub payload: serde_json::Value,

    pub priority: OperationPriority,

    pub enqueued_at: DateTime<Utc>,

    /// True only while an attempt is in flight. Reset on reload so a crash
    /// mid-attempt never leaves an operation stuck.
    pub is_processing: bool,

    pub status: OperationStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Caller-facing input to `queue_operation`. An id may be supplied for
/// idempotent enqueue; otherwise the queue assigns a UUID.
#[derive(Debug, Clone)]
pub struct OperationDraft {
    pub id: Option<String>,
    pub kind: OperationKind,
    pub collection: String,
    pub document_id: String,
    pub payload: serde_json::Value,
    pub priority: OperationPriority,
}

impl OperationDraft {
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        document_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            kind,
            collection: collection.into(),
            document_id: document_id.into(),
            payload,
            priority: OperationPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: OperationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

// ============================================================================
// Retry metadata
// ============================================================================

/// Attempt bookkeeping for one operation, keyed by operation id and
/// persisted independently of the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryMetadata {
    /// Strictly increases by 1 per execution attempt.
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
}

// ============================================================================
// Document cache
// ============================================================================

/// One cached remote document. Entries older than the TTL are treated as
/// absent on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub data: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.cached_at < ttl
    }
}

// ============================================================================
// Sync metadata and status views
// ============================================================================

/// Engine-wide sync bookkeeping, one instance per engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Watermark: completion time of the last full sync pass. Documents
    /// updated at or before this are already mirrored locally.
    pub last_sync_timestamp: DateTime<Utc>,

    /// Collections subject to incremental sync, in order.
    pub tracked_collections: Vec<String>,
}

impl SyncMetadata {
    pub fn new(tracked_collections: Vec<String>) -> Self {
        Self {
            last_sync_timestamp: epoch(),
            tracked_collections,
        }
    }
}

/// The Unix epoch, the watermark's reset value.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Read-only engine status for UI/status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_enabled: bool,
    pub is_online: bool,
    pub pending_operation_count: usize,
    pub last_sync_timestamp: DateTime<Utc>,
}

/// Read-only queue status.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Operations awaiting execution. Dead-letters are broken out into
    /// `failed` and not counted here.
    pub pending: usize,

    /// Operations with an attempt in flight.
    pub processing: usize,

    /// Dead-letters retained for manual inspection or removal.
    pub failed: usize,

    /// Completion time of the last drain pass, if any ran this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed: Option<DateTime<Utc>>,
}

// ============================================================================
// Tests
// ============================================================================
