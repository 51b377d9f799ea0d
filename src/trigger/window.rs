//! # In-Flight Window
//!
//! Admission control for async-mode handling. Deliveries are dispatched as
//! concurrent tasks while fewer than `max` are still running. Once `max` are in
//! flight at the same time the window is full and must be drained completely
//! before anything else is admitted. Tasks that finish before the window fills
//! free their slot straight away.
//!
//! Dropping the window detaches outstanding tasks rather than aborting them,
//! so a stop never cancels handling already under way.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error};

#[derive(Debug)]
pub struct InFlightWindow {
    max: usize,
    active: Arc<AtomicUsize>,
    tasks: JoinSet<()>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl InFlightWindow {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            active: Arc::new(AtomicUsize::new(0)),
            tasks: JoinSet::new(),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Tasks still running
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.in_flight() >= self.max
    }

    /// Dispatch one handling task. Callers check [`is_full`](Self::is_full) first.
    pub fn dispatch<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard(Arc::clone(&self.active));
        self.tasks.spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    /// Wait for every dispatched task, then reopen the window.
    ///
    /// Cancel-safe: if the future is dropped part way, the remaining tasks
    /// stay in the window.
    pub async fn drain(&mut self) {
        debug!(in_flight = self.in_flight(), "Draining in-flight window");
        while let Some(joined) = self.tasks.join_next().await {
            log_join_failure(joined);
        }
    }

    // Finished tasks stay in the set until joined
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            log_join_failure(joined);
        }
    }
}

fn log_join_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Message handling task failed");
    }
}

impl Drop for InFlightWindow {
    fn drop(&mut self) {
        self.tasks.detach_all();
    }
}
