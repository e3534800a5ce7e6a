//! Async work items backed by tokio.

use std::future::Future;
use tokio::runtime::Handle;

use super::{Completion, WorkItem};
use crate::error::{Error, Result};

/// Signals completion when dropped, so a panicking task still frees its slot.
struct SignalOnDrop(Completion);

impl Drop for SignalOnDrop {
    fn drop(&mut self) {
        self.0.done();
    }
}

impl WorkItem {
    /// Build an item that spawns `make()` onto the current tokio runtime each
    /// time it is invoked, and calls `completion.done()` once that future has
    /// finished or panicked.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime. See [`WorkItem::try_task`].
    pub fn task<F, Fut>(completion: Completion, make: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawning_on(Handle::current(), completion, make)
    }

    /// Like [`WorkItem::task`], but returns [`Error::Runtime`] instead of
    /// panicking when there is no current tokio runtime.
    pub fn try_task<F, Fut>(completion: Completion, make: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        Ok(Self::spawning_on(handle, completion, make))
    }

    fn spawning_on<F, Fut>(handle: Handle, completion: Completion, make: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        WorkItem::new(move || {
            let guard = SignalOnDrop(completion.clone());
            let fut = make();
            handle.spawn(async move {
                let _guard = guard;
                fut.await;
            });
        })
    }
}
