//! Bounded-parallelism task scheduler.
//!
//! At most `max_concurrent` tasks execute at once. Queued tasks start in the order
//! they were submitted as soon as a slot frees up. Every task reports only to its
//! own caller: a task that fails or panics never cancels, blocks or otherwise
//! affects any other queued or running task.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;

pub const DEFAULT_MAX_CONCURRENT: usize = 6;

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterError {
    #[error("task was cleared from the queue before it started")]
    Cleared,
    #[error("task panicked")]
    Panicked,
}

struct Slots {
    running: usize,
    queue: VecDeque<Job>,
}

struct Inner {
    max_concurrent: usize,
    slots: Mutex<Slots>,
}

#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    /// A `max_concurrent` of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        ConcurrencyLimiter {
            inner: Arc::new(Inner {
                max_concurrent: max_concurrent.max(1),
                slots: Mutex::new(Slots {
                    running: 0,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    /// Queues `task` and returns a future resolving to its output.
    ///
    /// The task is enqueued when `run` is called, not when the returned future is
    /// first polled, so submission order is call order. Must be called from within
    /// a tokio runtime.
    pub fn run<F, Fut, T>(
        &self,
        task: F,
    ) -> impl Future<Output = Result<T, LimiterError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move || {
            Box::pin(async move {
                // The task runs in its own tokio task so a panic is contained and
                // reported to this caller only.
                let outcome = tokio::spawn(async move { task().await })
                    .await
                    .map_err(|e| {
                        if e.is_panic() {
                            LimiterError::Panicked
                        } else {
                            LimiterError::Cleared
                        }
                    });
                let _ = tx.send(outcome);
            })
        });

        self.inner.slots.lock().queue.push_back(job);
        Inner::dispatch(&self.inner);

        // A dropped sender means the job was cleared before it started.
        async move { rx.await.unwrap_or(Err(LimiterError::Cleared)) }
    }

    /// Drops every task that has not started yet and returns how many were dropped.
    /// Running tasks are left to finish.
    pub fn clear(&self) -> usize {
        let dropped: Vec<Job> = self.inner.slots.lock().queue.drain(..).collect();
        dropped.len()
    }

    pub fn running(&self) -> usize {
        self.inner.slots.lock().running
    }

    pub fn queued(&self) -> usize {
        self.inner.slots.lock().queue.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl Inner {
    fn dispatch(inner: &Arc<Inner>) {
        let mut slots = inner.slots.lock();

        while slots.running < inner.max_concurrent {
            let Some(job) = slots.queue.pop_front() else {
                break;
            };
            slots.running += 1;

            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                job().await;
                inner.release();
            });
        }
    }

    fn release(self: Arc<Self>) {
        self.slots.lock().running -= 1;
        Inner::dispatch(&self);
    }
}
