//! Work items and their identity.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Identity of a work item. Clones of a [`WorkItem`] share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Process-unique id of one limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Inner {
    id: ItemId,
    run: Box<dyn Fn() + Send + Sync>,
    /// Limiters that have seen this item as low priority. Lives and dies
    /// with the item, so limiters keep nothing about items they dispatched.
    known_by: Mutex<Vec<InstanceId>>,
}

/// One unit of work: an opaque callable plus the token that identifies it.
///
/// Two items are the same item only if one was cloned from the other. Wrapping
/// the same closure twice with [`WorkItem::new`] yields two distinct items, so a
/// caller that wants to upgrade a queued item later must keep a clone of the
/// exact item it submitted.
#[derive(Clone)]
pub struct WorkItem {
    inner: Arc<Inner>,
}

impl WorkItem {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                id: ItemId::new(),
                run: Box::new(run),
                known_by: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ItemId {
        self.inner.id
    }

    /// Run the callable. Panics are not caught.
    pub fn invoke(&self) {
        (self.inner.run)()
    }

    /// Record that `limiter` has seen this item. False if it already had.
    pub(crate) fn mark_known(&self, limiter: InstanceId) -> bool {
        let mut known_by = self
            .inner
            .known_by
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if known_by.contains(&limiter) {
            false
        } else {
            known_by.push(limiter);
            true
        }
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for WorkItem {}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem").field("id", &self.id()).finish()
    }
}
