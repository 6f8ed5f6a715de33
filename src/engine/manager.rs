//! Sync engine - orchestrates offline-first synchronization
//!
//! Coordinates the operation queue, retry scheduler, document cache and
//! sync watermark over injected collaborators (durable store, remote
//! accessor, connectivity monitor, network hook). Handles:
//! - enable/disable with a persisted flag and the transport hook
//! - drain passes over a queue snapshot, one operation at a time
//! - retry gating and dead-letter marking
//! - incremental per-collection sync into the document cache
//! - restart recovery from persisted snapshots
//!
//! Every drain trigger (enable, reconnect, enqueue, startup) funnels
//! through one mpsc channel consumed by a single coordinator task, so at
//! most one drain pass runs at a time and trigger sources never race on
//! a shared guard. Requests arriving while a pass runs coalesce into
//! exactly one follow-up pass.

use super::cache::{CacheError, DocumentCache};
use super::models::{
    epoch, EngineConfig, OperationDraft, OperationStatus, PendingOperation, QueueStatus,
    SyncMetadata, SyncStatus,
};
use super::queue::{OperationQueue, QueueError};
use super::retry::{Eligibility, RetryError, RetryScheduler};
use crate::connectivity::{ConnectivityMonitor, ConnectivitySubscription};
use crate::remote::{ExecuteFn, NetworkControl, RemoteError, RemoteStore};
use crate::store::{KeyValueStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

// Stable persistence keys; restart recovery depends on them.
const META_KEY: &str = "sync.meta";
const ENABLED_KEY: &str = "sync.enabled";

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Retry scheduler error: {0}")]
    Retry(#[from] RetryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync is disabled")]
    SyncDisabled,

    #[error("Operation not found: {0}")]
    OperationNotFound(String),
}

/// Why a drain pass was requested, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainTrigger {
    Startup,
    SyncEnabled,
    BackOnline,
    OperationQueued,
}

impl DrainTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::SyncEnabled => "sync enabled",
            Self::BackOnline => "back online",
            Self::OperationQueued => "operation queued",
        }
    }
}

/// Offline-first sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    network: Arc<dyn NetworkControl>,

    queue: Arc<RwLock<OperationQueue>>,
    retry: Arc<RwLock<RetryScheduler>>,
    meta: Arc<RwLock<SyncMetadata>>,
    cache: Arc<DocumentCache>,

    enabled: Arc<AtomicBool>,
    online: Arc<AtomicBool>,
    /// Reentrancy guard: at most one drain pass at a time.
    draining: Arc<AtomicBool>,
    last_processed: Arc<RwLock<Option<DateTime<Utc>>>>,

    drain_tx: mpsc::UnboundedSender<DrainTrigger>,
    coordinator: Arc<StdMutex<Option<JoinHandle<()>>>>,
    subscription: Arc<StdMutex<Option<ConnectivitySubscription>>>,
}

impl SyncEngine {
    /// Load persisted state, subscribe to connectivity and start the
    /// drain coordinator. Fails loudly if the durable store is unreadable
    /// rather than continuing half-initialized.
    pub async fn initialize(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        network: Arc<dyn NetworkControl>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let enabled = matches!(store.get(ENABLED_KEY).await?.as_deref(), Some("true"));

        let queue = OperationQueue::load(store.clone()).await?;
        let retry =
            RetryScheduler::load(store.clone(), config.max_attempts, config.retry_delay).await?;

        // The watermark survives restarts; the tracked set follows the
        // current configuration.
        let meta = match store.get(META_KEY).await? {
            Some(raw) => {
                let mut meta: SyncMetadata = serde_json::from_str(&raw)?;
                meta.tracked_collections = config.tracked_collections.clone();
                meta
            }
            None => SyncMetadata::new(config.tracked_collections.clone()),
        };

        let cache = DocumentCache::new(store.clone(), config.cache_ttl);

        let (drain_tx, drain_rx) = mpsc::unbounded_channel();

        let engine = Self {
            store,
            remote,
            network,
            queue: Arc::new(RwLock::new(queue)),
            retry: Arc::new(RwLock::new(retry)),
            meta: Arc::new(RwLock::new(meta)),
            cache: Arc::new(cache),
            enabled: Arc::new(AtomicBool::new(enabled)),
            online: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            last_processed: Arc::new(RwLock::new(None)),
            drain_tx,
            coordinator: Arc::new(StdMutex::new(None)),
            subscription: Arc::new(StdMutex::new(None)),
        };

        let handle = tokio::spawn(Self::coordinator_loop(engine.clone(), drain_rx));
        if let Ok(mut slot) = engine.coordinator.lock() {
            *slot = Some(handle);
        }

        // All trigger sources only request a drain; the coordinator is
        // the single decision point.
        let online_flag = engine.online.clone();
        let tx = engine.drain_tx.clone();
        let subscription = connectivity.subscribe(Box::new(move |is_online| {
            let was_online = online_flag.swap(is_online, Ordering::SeqCst);
            if is_online && !was_online {
                let _ = tx.send(DrainTrigger::BackOnline);
            }
        }));
        if let Ok(mut slot) = engine.subscription.lock() {
            *slot = Some(subscription);
        }

        // Sampled only after the callback is registered: a transition during
        // startup lands either in the callback or in this read, never in
        // neither.
        if connectivity.is_online() {
            engine.online.store(true, Ordering::SeqCst);
        }

        log::info!(
            "Sync engine initialized (enabled: {}, online: {}, {} queued operation(s))",
            engine.enabled.load(Ordering::SeqCst),
            engine.online.load(Ordering::SeqCst),
            engine.queue.read().await.len()
        );

        if enabled {
            engine.request_drain(DrainTrigger::Startup);
        }

        Ok(engine)
    }

    /// Stop the coordinator task and drop the connectivity subscription.
    /// An in-flight drain pass is not interrupted mid-operation.
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.subscription.lock() {
            slot.take();
        }
        if let Ok(mut slot) = self.coordinator.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                log::info!("Sync engine shut down");
            }
        }
    }

    // ========================================================================
    // Enable / disable
    // ========================================================================

    /// Enable sync, persist the flag and request a drain. The network
    /// hook runs first; its rejection aborts the enable.
    pub async fn enable_sync(&self) -> Result<(), EngineError> {
        self.network.set_network_enabled(true).await?;

        self.enabled.store(true, Ordering::SeqCst);
        self.store.set(ENABLED_KEY, "true").await?;
        log::info!("Sync enabled");

        self.request_drain(DrainTrigger::SyncEnabled);
        Ok(())
    }

    /// Disable sync and persist the flag. Does not cancel an in-flight
    /// drain pass, only prevents new ones. The network hook is
    /// best-effort here.
    pub async fn disable_sync(&self) -> Result<(), EngineError> {
        self.enabled.store(false, Ordering::SeqCst);
        self.store.set(ENABLED_KEY, "false").await?;

        if let Err(e) = self.network.set_network_enabled(false).await {
            log::warn!("Network disable hook failed: {}", e);
        }

        log::info!("Sync disabled");
        Ok(())
    }

    // ========================================================================
    // Operation queue
    // ========================================================================

    /// Enqueue a mutation together with the closure that performs its
    /// remote write, then request a drain. Offline or disabled, the
    /// operation simply waits in the durable queue.
    pub async fn queue_operation(
        &self,
        draft: OperationDraft,
        execute: ExecuteFn,
    ) -> Result<String, EngineError> {
        let id = self.queue.write().await.enqueue(draft, Some(execute)).await?;
        self.request_drain(DrainTrigger::OperationQueued);
        Ok(id)
    }

    /// Re-attach the execute closure to an operation reloaded from the
    /// store. Until bound, the operation is skipped by drain passes.
    pub async fn bind_executor(&self, id: &str, execute: ExecuteFn) -> Result<(), EngineError> {
        self.queue.write().await.bind_executor(id, execute)?;
        Ok(())
    }

    /// Dead-letter operations retained for manual inspection.
    pub async fn failed_operations(&self) -> Vec<PendingOperation> {
        self.queue
            .read()
            .await
            .failed()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Manually drop one operation (the only way a dead-letter leaves
    /// the queue). Clears its retry metadata as well.
    pub async fn remove_operation(&self, id: &str) -> Result<(), EngineError> {
        let mut queue = self.queue.write().await;
        queue
            .remove(id)
            .ok_or_else(|| EngineError::OperationNotFound(id.to_string()))?;
        queue.persist().await?;
        drop(queue);

        let mut retry = self.retry.write().await;
        retry.clear(id);
        retry.persist().await?;
        Ok(())
    }

    /// Reset all dead-letters for a fresh round of attempts and request
    /// a drain.
    pub async fn retry_failed(&self) -> Result<usize, EngineError> {
        let reset = self.queue.write().await.reset_failed().await?;
        if !reset.is_empty() {
            let mut retry = self.retry.write().await;
            for id in &reset {
                retry.clear(id);
            }
            retry.persist().await?;
            self.request_drain(DrainTrigger::OperationQueued);
        }
        Ok(reset.len())
    }

    // ========================================================================
    // Status views
    // ========================================================================

    pub async fn get_sync_status(&self) -> SyncStatus {
        let queue = self.queue.read().await;
        let status = queue.status(None);
        SyncStatus {
            is_enabled: self.enabled.load(Ordering::SeqCst),
            is_online: self.online.load(Ordering::SeqCst),
            pending_operation_count: status.pending,
            last_sync_timestamp: self.meta.read().await.last_sync_timestamp,
        }
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        let last_processed = *self.last_processed.read().await;
        self.queue.read().await.status(last_processed)
    }

    // ========================================================================
    // Incremental sync and document cache
    // ========================================================================

    /// Incrementally sync one collection: fetch documents updated after
    /// the current watermark and mirror them into the cache. Does not
    /// advance the watermark; only `sync_all` does, at the end of a full
    /// pass. Returns the number of documents fetched.
    pub async fn sync_collection(&self, collection: &str) -> Result<usize, EngineError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(EngineError::SyncDisabled);
        }
        self.sync_collection_inner(collection).await
    }

    async fn sync_collection_inner(&self, collection: &str) -> Result<usize, EngineError> {
        let since = self.meta.read().await.last_sync_timestamp;

        let documents = self.remote.query_updated_after(collection, since).await?;
        log::info!(
            "Incremental sync for {}: {} document(s) since {}",
            collection,
            documents.len(),
            since.to_rfc3339()
        );

        let count = documents.len();
        for doc in documents {
            self.cache.put(collection, &doc.id, doc.data).await?;
        }
        Ok(count)
    }

    /// Run `sync_collection` for every tracked collection, then advance
    /// the watermark and persist it. Fails fast when sync is disabled;
    /// a failing collection aborts the pass without advancing the
    /// watermark, so nothing is skipped on the next attempt.
    pub async fn sync_all(&self) -> Result<(), EngineError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(EngineError::SyncDisabled);
        }

        let collections = self.meta.read().await.tracked_collections.clone();
        for collection in &collections {
            self.sync_collection_inner(collection).await?;
        }

        let now = Utc::now();
        let mut meta = self.meta.write().await;
        meta.last_sync_timestamp = now;
        self.persist_meta(&meta).await?;

        log::info!(
            "Full sync pass completed ({} collection(s), watermark {})",
            collections.len(),
            now.to_rfc3339()
        );
        Ok(())
    }

    /// Last-known copy of a document, or `None` when missing or older
    /// than the TTL.
    pub async fn get_cached_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>, EngineError> {
        Ok(self.cache.get(collection, id).await?)
    }

    /// Drop every cached document for the tracked collections and reset
    /// the watermark to the epoch, forcing the next sync to be full.
    pub async fn clear_cache(&self) -> Result<(), EngineError> {
        let mut meta = self.meta.write().await;
        self.cache.clear(&meta.tracked_collections).await?;
        meta.last_sync_timestamp = epoch();
        self.persist_meta(&meta).await?;
        Ok(())
    }

    async fn persist_meta(&self, meta: &SyncMetadata) -> Result<(), EngineError> {
        let raw = serde_json::to_string(meta)?;
        self.store.set(META_KEY, &raw).await?;
        Ok(())
    }

    // ========================================================================
    // Drain coordination
    // ========================================================================

    fn request_drain(&self, trigger: DrainTrigger) {
        if self.drain_tx.send(trigger).is_err() {
            log::warn!("Drain coordinator is not running, request dropped");
        }
    }

    /// Single consumer of all drain requests. Serializes passes and
    /// coalesces request bursts, so an enqueue during a pass yields
    /// exactly one follow-up pass.
    async fn coordinator_loop(
        engine: SyncEngine,
        mut drain_rx: mpsc::UnboundedReceiver<DrainTrigger>,
    ) {
        while let Some(trigger) = drain_rx.recv().await {
            let mut coalesced = 0;
            while drain_rx.try_recv().is_ok() {
                coalesced += 1;
            }
            if coalesced > 0 {
                log::debug!("Coalesced {} additional drain request(s)", coalesced);
            }

            if !engine.enabled.load(Ordering::SeqCst) {
                log::debug!("Drain request ({}) ignored: sync disabled", trigger.as_str());
                continue;
            }
            if !engine.online.load(Ordering::SeqCst) {
                log::debug!("Drain request ({}) ignored: offline", trigger.as_str());
                continue;
            }

            log::debug!("Drain pass triggered: {}", trigger.as_str());
            if let Err(e) = engine.drain_pass().await {
                log::error!("Drain pass failed: {}", e);
            }
        }

        log::info!("Drain coordinator stopped");
    }

    /// Run one drain pass over a snapshot of the queue. A second caller
    /// while a pass is running is a no-op.
    pub(crate) async fn drain_pass(&self) -> Result<(), EngineError> {
        if self.draining.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.run_drain_pass().await;
        self.draining.store(false, Ordering::SeqCst);
        result
    }

    async fn run_drain_pass(&self) -> Result<(), EngineError> {
        // Snapshot at pass start: operations enqueued mid-pass belong to
        // the next trigger.
        let snapshot = self.queue.read().await.snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }

        log::info!("Drain pass started over {} operation(s)", snapshot.len());
        let mut executed = 0usize;
        let mut failed = 0usize;
        let mut deferred = 0usize;

        for id in snapshot {
            let now = Utc::now();

            let (future, attempt) = {
                let mut queue = self.queue.write().await;
                let mut retry = self.retry.write().await;

                let Some(op) = queue.get(&id) else {
                    continue;
                };
                if op.is_processing || op.status == OperationStatus::Failed {
                    continue;
                }

                match retry.check(&id, now) {
                    Eligibility::Wait => {
                        deferred += 1;
                        continue;
                    }
                    Eligibility::Exhausted => {
                        let message = format!(
                            "retry limit reached after {} attempts",
                            retry.max_attempts()
                        );
                        if let Some(op) = queue.get_mut(&id) {
                            op.status = OperationStatus::Failed;
                            op.last_error = Some(message);
                        }
                        log::warn!("Operation {} moved to dead-letter", id);
                        failed += 1;
                        continue;
                    }
                    Eligibility::Ready => {}
                }

                let Some(execute) = queue.executor(&id) else {
                    log::debug!("Operation {} has no bound executor, skipping", id);
                    deferred += 1;
                    continue;
                };
                let future = execute();

                // Counted before the attempt runs so a crash mid-execute
                // cannot fast-loop on restart.
                let attempt = retry.begin_attempt(&id, now);
                if let Some(op) = queue.get_mut(&id) {
                    op.is_processing = true;
                }
                log::debug!(
                    "Attempting operation {} (attempt {}/{})",
                    id,
                    attempt,
                    retry.max_attempts()
                );
                (future, attempt)
            };

            // Locks released: the execute may suspend on remote I/O and
            // enqueues must be able to interleave.
            let outcome = future.await;

            let mut queue = self.queue.write().await;
            match outcome {
                Ok(()) => {
                    queue.remove(&id);
                    self.retry.write().await.clear(&id);
                    executed += 1;
                    log::info!("Operation {} completed", id);
                }
                Err(error) => {
                    log::warn!("Operation {} failed: {}", id, error);
                    let max = self.retry.read().await.max_attempts();
                    if let Some(op) = queue.get_mut(&id) {
                        op.is_processing = false;
                        op.last_error = Some(error);
                        // The final attempt dead-letters right away, so
                        // status reads are truthful without another pass.
                        if attempt >= max {
                            op.status = OperationStatus::Failed;
                            op.last_error =
                                Some(format!("retry limit reached after {} attempts", max));
                            log::warn!("Operation {} moved to dead-letter", id);
                        }
                    }
                    failed += 1;
                    // One failure never aborts the pass.
                }
            }
        }

        *self.last_processed.write().await = Some(Utc::now());

        // One snapshot write per pass for queue and retry metadata, to
        // bound storage churn.
        self.queue.read().await.persist().await?;
        self.retry.read().await.persist().await?;

        log::info!(
            "Drain pass completed: {} executed, {} failed, {} deferred",
            executed,
            failed,
            deferred
        );
        Ok(())
    }
}
