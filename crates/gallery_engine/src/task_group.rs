use std::future::Future;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancellation signal plus outstanding-work tracking for one subscription.
///
/// The signal is raised at most once — `close` consumes the group, so a
/// second raise is unrepresentable — and can be observed by any number of
/// tasks without blocking. `close` additionally waits for every spawned task
/// to finish, which is what lets callers assume no callback outlives it.
pub(crate) struct TaskGroup {
    cancel: CancellationToken,
    tracker: TaskTracker,
    runtime: Handle,
}

impl TaskGroup {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            runtime,
        }
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(task, &self.runtime);
    }

    /// Raises the signal, then blocks until every task has observed it and
    /// exited. Must be called from a thread outside the engine runtime.
    pub(crate) fn close(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.runtime.block_on(self.tracker.wait());
    }
}
