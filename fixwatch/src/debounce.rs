//! Single-slot cancellable delayed task.
//!
//! Each [`Debouncer::schedule`] call aborts the pending timer and arms a new
//! one, so a burst of calls collapses into one execution per quiet period.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Holds at most one pending timer.
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Creates a debouncer with nothing scheduled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, replacing any pending timer.
    ///
    /// Once the delay elapses the task is detached onto its own tokio task,
    /// so a later `schedule` or `cancel` never interrupts it mid-flight.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task);
        });
        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the pending timer. Returns whether one was still waiting.
    pub fn cancel(&self) -> bool {
        self.pending.lock().take().is_some_and(|handle| {
            let waiting = !handle.is_finished();
            handle.abort();
            waiting
        })
    }

    /// Whether a timer is armed and has not fired yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}
