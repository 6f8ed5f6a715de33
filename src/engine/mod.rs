//! Sync engine - offline-first synchronization for Callboard clients
//!
//! A client keeps working while disconnected: mutations it cannot send
//! are durably queued, replayed once connectivity returns, and a
//! TTL-bounded document cache plus an incremental sync watermark keep
//! reads serviceable offline.
//!
//! Architecture:
//! - `queue`: ordered, persisted pending mutations (priority then FIFO)
//! - `retry`: per-operation attempt gating with cool-down and dead-letters
//! - `cache`: 24h TTL local mirror of remote documents
//! - `manager`: the orchestrator tying it together over injected seams

pub mod cache;
pub mod manager;
pub mod models;
pub mod queue;
pub mod retry;


// Re-export commonly used types
pub use cache::{CacheError, DocumentCache};
pub use manager::{EngineError, SyncEngine};
pub use models::{
    CachedEntry, EngineConfig, OperationDraft, OperationKind, OperationPriority,
    OperationStatus, PendingOperation, QueueStatus, RetryMetadata, SyncMetadata, SyncStatus,
};
pub use queue::{OperationQueue, QueueError};
pub use retry::{Eligibility, RetryError, RetryScheduler};
