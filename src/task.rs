//! Background tasks of a router, cancelled together when the handle is dropped.

use tokio::task::{AbortHandle, JoinHandle};

/// Handle to the periodic tasks of a [`Router`](crate::router::Router). All tasks are aborted
/// once this is dropped.
pub struct Tasks(Vec<AbortHandle>);

impl Tasks {
    pub(crate) fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push<T>(&mut self, handle: JoinHandle<T>) {
        self.0.push(handle.abort_handle());
    }

    /// Amount of running tasks.
    pub fn len(&self) -> usize {
        self.0.iter().filter(|h| !h.is_finished()).count()
    }

    /// Checks if all tasks finished.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort all tasks. Calling this more than once has no further effect.
    #[inline]
    pub fn abort(&self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl Drop for Tasks {
    #[inline]
    fn drop(&mut self) {
        self.abort()
    }
}
