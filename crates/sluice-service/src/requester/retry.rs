use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Runs deferred work after a fixed delay, unless it gets cancelled first.
///
/// Every scheduled item is tracked, so [`shutdown`](Self::shutdown) can cancel all of them and
/// wait until each one has run its cancellation path.
#[derive(Clone, Debug, Default)]
pub struct RetryScheduler {
    token: CancellationToken,
    tracker: TaskTracker,
}

/// Handle to a deferred request, across all of its retries.
#[derive(Clone, Debug)]
pub struct RetryHandle {
    token: CancellationToken,
}

impl RetryHandle {
    /// Cancels the pending retry, and any retry scheduled with this handle later on.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the handle for a new chain of retries.
    ///
    /// The handle stays valid for every [`schedule`](Self::schedule) call it is passed to, so
    /// a single [`RetryHandle::cancel`] stops a retry that keeps getting rescheduled. A handle
    /// created after [`shutdown`](Self::shutdown) is cancelled from the start.
    pub fn handle(&self) -> RetryHandle {
        RetryHandle {
            token: self.token.child_token(),
        }
    }

    /// Hands `task` to `run` once `delay` has elapsed.
    ///
    /// If `handle` is cancelled first, either directly or by [`shutdown`](Self::shutdown),
    /// `task` goes to `cancel` instead. Exactly one of the two is called. Scheduling with a
    /// cancelled handle cancels immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<T, R, C, F>(
        &self,
        handle: &RetryHandle,
        delay: Duration,
        task: T,
        run: R,
        cancel: C,
    ) where
        T: Send + 'static,
        R: FnOnce(T) + Send + 'static,
        C: FnOnce(T) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let token = handle.token.clone();

        self.tracker.spawn(async move {
            let cancelled = tokio::select! {
                biased;
                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };

            if cancelled {
                cancel(task).await;
            } else {
                run(task);
            }
        });
    }

    /// Number of retries that have neither fired nor finished cancelling.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancels all pending retries and waits for them to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
