use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::bookmark::OwnerId;
use crate::store::StoreError;

/// Callback invoked when an owner's collection may have changed.
///
/// Notifications carry no payload: the only contract is "re-derive truth".
/// Delivery is at-least-once, so callbacks must tolerate duplicates.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`ChangeFeed::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Push channel signalling changes to an owner's whole collection.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(
        &self,
        owner: &OwnerId,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, StoreError>;

    /// Release a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// In-process change feed.
///
/// Stores attached to a `MemoryFeed` call [`MemoryFeed::publish`] after each
/// successful write, emulating a realtime channel for every session of the
/// same owner.
#[derive(Default)]
pub struct MemoryFeed {
    next_handle: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionHandle, (OwnerId, ChangeCallback)>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify every subscriber of `owner`. Returns how many were notified.
    pub fn publish(&self, owner: &OwnerId) -> usize {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let callbacks: Vec<ChangeCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(o, _)| o == owner)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &callbacks {
            cb();
        }
        callbacks.len()
    }

    pub fn subscriber_count(&self, owner: &OwnerId) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(o, _)| o == owner)
            .count()
    }
}

impl ChangeFeed for MemoryFeed {
    fn subscribe(
        &self,
        owner: &OwnerId,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, StoreError> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, (owner.clone(), on_change));
        tracing::debug!(%owner, handle = handle.raw(), "feed subscription opened");
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let removed = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if removed.is_some() {
            tracing::debug!(handle = handle.raw(), "feed subscription released");
        }
    }
}
