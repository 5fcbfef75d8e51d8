use std::time::Duration;
use tokio::task::AbortHandle;

/// Single-shot deadline that runs a callback once it elapses.
///
/// Stopping (or dropping) the timer before the deadline guarantees the
/// callback never runs. Must be started from within a tokio runtime.
#[derive(Debug)]
pub struct RequestTimer {
    handle: AbortHandle,
}

impl RequestTimer {
    pub fn start<F>(after: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_fire();
        });
        Self {
            handle: task.abort_handle(),
        }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    /// True once the callback has run or the timer was stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Abort handle of one in-flight transport call. Dropping it aborts the call.
#[derive(Debug)]
pub(crate) struct Transport {
    handle: Option<AbortHandle>,
}

impl Transport {
    pub(crate) fn new(handle: AbortHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Release the handle without aborting (the call already finished).
    pub(crate) fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
