//! Remote store seams
//!
//! The engine is transport-agnostic: it never talks to the document store
//! directly. The embedding application supplies
//! - a [`RemoteStore`] for incremental reads (`query_updated_after`),
//! - a per-operation execute closure ([`ExecuteFn`]) that performs the
//!   actual remote write for a queued mutation, and
//! - a [`NetworkControl`] hook the engine calls when sync is enabled or
//!   disabled so the transport can allow/deny traffic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remote accessor error. The engine treats the remote as opaque, so a
/// message string is all it records.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Remote query failed: {0}")]
    Query(String),

    #[error("Network control rejected: {0}")]
    Network(String),
}

/// One document returned by an incremental query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Read access to the remote document store, scoped to what incremental
/// sync needs.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All documents in `collection` whose remote update timestamp is
    /// strictly greater than `since`.
    async fn query_updated_after(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteDocument>, RemoteError>;
}

/// Best-effort instruction to the transport layer to allow or deny
/// network traffic.
#[async_trait]
pub trait NetworkControl: Send + Sync {
    async fn set_network_enabled(&self, enabled: bool) -> Result<(), RemoteError>;
}

/// No-op [`NetworkControl`] for transports with nothing to toggle.
pub struct AllowAllNetwork;

#[async_trait]
impl NetworkControl for AllowAllNetwork {
    async fn set_network_enabled(&self, _enabled: bool) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Future returned by an execute closure. The error string becomes the
/// operation's `last_error`.
pub type ExecuteFuture = BoxFuture<'static, Result<(), String>>;

/// Caller-supplied zero-argument action that performs the real remote
/// write for one queued operation. Not persisted; re-bound by the caller
/// after a restart (see `SyncEngine::bind_executor`).
pub type ExecuteFn = Box<dyn Fn() -> ExecuteFuture + Send + Sync>;
