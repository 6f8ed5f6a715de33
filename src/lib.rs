//! Callboard sync - offline-first synchronization engine
//!
//! Library consumed by the Callboard stage-management clients (shows,
//! props, venues, task boards, shopping lists). The UI keeps issuing
//! mutations while disconnected; this crate durably queues them, replays
//! them once connectivity returns, and maintains a TTL-bounded local
//! read cache with an incremental sync watermark.
//!
//! The engine owns no transport. The embedding application injects:
//! - a durable [`store::KeyValueStore`] for persisted snapshots
//! - a [`connectivity::ConnectivityMonitor`] reporting online/offline
//! - a [`remote::RemoteStore`] for incremental reads
//! - per-operation execute closures that perform the actual remote writes
//!
//! ```no_run
//! use callboard_sync::{
//!     AllowAllNetwork, EngineConfig, OperationDraft, OperationKind, SharedConnectivity,
//!     SqliteStore, SyncEngine,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run(remote: Arc<dyn callboard_sync::RemoteStore>) -> Result<(), callboard_sync::EngineError> {
//! let store = Arc::new(SqliteStore::new("callboard.db".into())?);
//! let connectivity = SharedConnectivity::new(true);
//!
//! let engine = SyncEngine::initialize(
//!     store,
//!     remote,
//!     Arc::new(connectivity.clone()),
//!     Arc::new(AllowAllNetwork),
//!     EngineConfig::default(),
//! )
//! .await?;
//!
//! engine.enable_sync().await?;
//! engine
//!     .queue_operation(
//!         OperationDraft::new(OperationKind::Update, "props", "sword-42", json!({"condition": "repaired"})),
//!         Box::new(|| Box::pin(async { Ok(()) })),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod connectivity;
pub mod engine;
pub mod remote;
pub mod store;

// Re-export the public surface
pub use connectivity::{ConnectivityMonitor, ConnectivitySubscription, SharedConnectivity};
pub use engine::{
    CachedEntry, EngineConfig, EngineError, OperationDraft, OperationKind, OperationPriority,
    OperationStatus, PendingOperation, QueueStatus, RetryMetadata, SyncEngine, SyncMetadata,
    SyncStatus,
};
pub use remote::{
    AllowAllNetwork, ExecuteFn, ExecuteFuture, NetworkControl, RemoteDocument, RemoteError,
    RemoteStore,
};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreError};
