//! Command queue
//!
//! Serializes every device operation on a connection. Tasks run strictly
//! one at a time in submission order on a background worker; each caller
//! awaits its own result.
//!
//! The queue is bounded: a submission that finds [`MAX_TASK_QUEUE`] tasks
//! already waiting drops all of them (their callers observe
//! [`ControlError::QueueReset`]) and becomes the only waiting task. The
//! task currently executing is never interrupted.

use beamctl_core::ControlError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

/// Maximum number of tasks waiting behind the running one
pub const MAX_TASK_QUEUE: usize = 30;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueueInner {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
    running: AtomicBool,
}

/// FIFO executor for device tasks
pub struct CommandQueue {
    inner: Arc<QueueInner>,
    worker: JoinHandle<()>,
}

impl CommandQueue {
    /// Create a queue and start its worker on the current runtime
    pub fn new() -> Self {
        let inner = Arc::new(QueueInner {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
        });

        let worker_inner = inner.clone();
        let worker = tokio::spawn(async move {
            loop {
                let next = worker_inner.jobs.lock().pop_front();
                match next {
                    Some(job) => {
                        worker_inner.running.store(true, Ordering::SeqCst);
                        if let Err(e) = tokio::spawn(job).await {
                            tracing::error!("Queued task aborted: {}", e);
                        }
                        worker_inner.running.store(false, Ordering::SeqCst);
                    }
                    None => worker_inner.notify.notified().await,
                }
            }
        });

        Self { inner, worker }
    }

    /// Enqueue `task` and return a future resolving to its result
    ///
    /// The task is enqueued immediately, so submission order is execution
    /// order even if the returned futures are awaited out of order.
    pub fn submit<F, T>(&self, task: F) -> impl Future<Output = Result<T, ControlError>> + Send
    where
        F: Future<Output = Result<T, ControlError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(task.await);
        });

        {
            let mut jobs = self.inner.jobs.lock();
            if jobs.len() >= MAX_TASK_QUEUE {
                tracing::error!(
                    "Command queue overflow: {} tasks waiting, dropping them",
                    jobs.len()
                );
                jobs.clear();
            }
            jobs.push_back(job);
        }
        self.inner.notify.notify_one();

        async move { rx.await.unwrap_or(Err(ControlError::QueueReset)) }
    }

    /// Number of tasks waiting to run
    pub fn len(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    /// Whether no task is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether no task is waiting or running
    pub fn is_idle(&self) -> bool {
        self.is_empty() && !self.inner.running.load(Ordering::SeqCst)
    }

    /// Drop every waiting task
    pub fn clear(&self) {
        let dropped = {
            let mut jobs = self.inner.jobs.lock();
            std::mem::take(&mut *jobs)
        };
        if !dropped.is_empty() {
            tracing::warn!("Cleared {} queued tasks", dropped.len());
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.worker.abort();
        self.inner.jobs.lock().clear();
    }
}
