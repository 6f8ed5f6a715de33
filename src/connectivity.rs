//! Connectivity monitoring
//!
//! The engine never probes the network itself. The embedding application
//! owns connectivity detection (OS events, transport errors, heartbeats)
//! and reports boolean transitions through a [`ConnectivityMonitor`].
//! [`SharedConnectivity`] is the stock implementation: a cloneable handle
//! the transport layer flips with `set_online`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Callback invoked on every online/offline transition.
pub type ConnectivityCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Reports online/offline transitions to subscribers.
pub trait ConnectivityMonitor: Send + Sync {
    /// Current best-guess connectivity.
    fn is_online(&self) -> bool;

    /// Register a callback for transitions. Dropping the returned
    /// subscription (or calling `unsubscribe`) deregisters it.
    fn subscribe(&self, on_change: ConnectivityCallback) -> ConnectivitySubscription;
}

type SubscriberList = Arc<Mutex<Vec<(u64, ConnectivityCallback)>>>;

/// Handle for an active connectivity subscription.
pub struct ConnectivitySubscription {
    id: u64,
    subscribers: SubscriberList,
}

impl ConnectivitySubscription {
    /// Explicitly deregister the callback. Equivalent to dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Shared connectivity state, flipped by the transport layer.
///
/// Clones share the same state, so the application can hand one clone to
/// its transport code and another to the sync engine.
#[derive(Clone, Default)]
pub struct SharedConnectivity {
    online: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    subscribers: SubscriberList,
}

impl SharedConnectivity {
    /// Start in the given state. No callbacks fire for the initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
            next_id: Arc::new(AtomicU64::new(0)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report a connectivity observation. Subscribers are only notified
    /// on an actual transition, repeated reports of the same state are
    /// ignored.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        log::info!(
            "Connectivity transition: {} -> {}",
            if previous { "online" } else { "offline" },
            if online { "online" } else { "offline" }
        );

        if let Ok(subs) = self.subscribers.lock() {
            for (_, callback) in subs.iter() {
                callback(online);
            }
        }
    }
}

impl ConnectivityMonitor for SharedConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self, on_change: ConnectivityCallback) -> ConnectivitySubscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((id, on_change));
        }
        ConnectivitySubscription {
            id,
            subscribers: self.subscribers.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
