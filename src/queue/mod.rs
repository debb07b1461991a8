//! Bounded worker pool that runs queued events off the I/O threads.
//!
//! Every submission becomes a tracked task that waits for one of `workers`
//! permits and then runs the work on Tokio's blocking pool, so event
//! processing (which may sleep or compute for seconds) never stalls a
//! connection. No start order is guaranteed between submissions.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// How a submitter waits on its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionMode {
    /// Return as soon as the work is queued.
    #[default]
    FireAndForget,
    /// Return only after the work has run to completion.
    Blocking,
    /// Run now on the blocking pool without waiting for a worker, and return
    /// after it completes. Accepted even after the queue is closed.
    Bypass,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("processing queue is closed")]
    Closed,

    #[error("queued work panicked")]
    Panicked,
}

struct Inner {
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    workers: usize,
}

/// Cheaply cloneable handle to the shared pool.
#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Arc<Inner>,
}

impl ProcessingQueue {
    /// Creates a pool that runs at most `workers` items at once (minimum 1).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(workers)),
                tasks: TaskTracker::new(),
                workers,
            }),
        }
    }

    /// One worker per available CPU.
    pub fn with_available_parallelism() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Submitted items that have not finished yet, running or waiting.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tasks.is_closed()
    }

    /// Queues `work`.
    ///
    /// With [`SubmissionMode::Blocking`] this resolves once `work` has
    /// returned; with [`SubmissionMode::FireAndForget`] it resolves as soon
    /// as the work is queued, and a panic is only logged.
    /// [`SubmissionMode::Bypass`] work skips the worker limit and is not
    /// waited for by [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    ///
    /// - [`QueueError::Closed`] if [`close`](Self::close) has been called.
    /// - [`QueueError::Panicked`] if blocking or bypass work panicked.
    pub async fn submit<F>(&self, mode: SubmissionMode, work: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        if mode == SubmissionMode::Bypass {
            return tokio::task::spawn_blocking(work).await.map_err(|e| {
                error!(error = %e, "bypass work panicked");
                QueueError::Panicked
            });
        }
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let permits = Arc::clone(&self.inner.permits);
        let handle = self.inner.tasks.spawn(async move {
            // The semaphore is never closed, so acquiring cannot fail.
            let _permit = permits.acquire_owned().await.map_err(|_| QueueError::Closed)?;
            tokio::task::spawn_blocking(work).await.map_err(|e| {
                error!(error = %e, "queued work panicked");
                QueueError::Panicked
            })
        });

        match mode {
            SubmissionMode::FireAndForget => Ok(()),
            SubmissionMode::Blocking | SubmissionMode::Bypass => {
                handle.await.map_err(|_| QueueError::Panicked)?
            }
        }
    }

    /// Stops accepting new work. Already queued work still runs.
    pub fn close(&self) {
        if self.inner.tasks.close() {
            debug!(in_flight = self.in_flight(), "processing queue closed");
        }
    }

    /// Closes the queue and waits for everything already queued to finish.
    pub async fn shutdown(&self) {
        self.close();
        self.inner.tasks.wait().await;
    }
}

impl std::fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("workers", &self.inner.workers)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}
