//! Bounded concurrent execution of dispatched jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool has been shut down")]
    PoolShutdown,

    #[error("worker pool rejected the task: {0}")]
    Rejected(String),
}

/// Contract the scheduling loop and dispatcher program against. The loop
/// sizes its acquisition batches by [`WorkerPool::block_for_available_workers`];
/// the dispatcher hands executions to [`WorkerPool::run_in_worker`].
pub trait WorkerPool: Send + Sync {
    fn pool_size(&self) -> usize;

    /// Wait until at least one worker slot is free and return the free
    /// count. Returns 0 only after shutdown.
    fn block_for_available_workers<'a>(&'a self) -> BoxFuture<'a, usize>;

    /// Submit a task. The pool bounds concurrency; the task runs as soon
    /// as a slot frees up.
    fn run_in_worker(&self, task: BoxFuture<'static, ()>) -> Result<(), WorkerPoolError>;

    /// Stop accepting tasks. With `wait`, resolve only once every running
    /// task has finished.
    fn shutdown<'a>(&'a self, wait: bool) -> BoxFuture<'a, ()>;
}

/// Default pool: a semaphore with one permit per worker. Each submitted
/// task holds a permit for its whole run, so draining the pool is
/// acquiring every permit.
pub struct TokioWorkerPool {
    size: usize,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl TokioWorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            slots: Arc::new(Semaphore::new(size)),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl WorkerPool for TokioWorkerPool {
    fn pool_size(&self) -> usize {
        self.size
    }

    fn block_for_available_workers<'a>(&'a self) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            loop {
                if self.is_closed() {
                    return 0;
                }
                match self.slots.try_acquire() {
                    Ok(permit) => {
                        let available = self.slots.available_permits() + 1;
                        drop(permit);
                        return available;
                    }
                    Err(_) => {
                        // All slots busy; wake on shutdown or on the next
                        // permit release.
                        tokio::select! {
                            _ = self.closed_notify.notified() => {}
                            permit = self.slots.acquire() => {
                                if let Ok(permit) = permit {
                                    let available = self.slots.available_permits() + 1;
                                    drop(permit);
                                    return available;
                                }
                                return 0;
                            }
                        }
                    }
                }
            }
        })
    }

    fn run_in_worker(&self, task: BoxFuture<'static, ()>) -> Result<(), WorkerPoolError> {
        if self.is_closed() {
            return Err(WorkerPoolError::PoolShutdown);
        }
        let slots = Arc::clone(&self.slots);
        tokio::spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                // Semaphore closed mid-flight; the task is dropped.
                return;
            };
            task.await;
        });
        Ok(())
    }

    fn shutdown<'a>(&'a self, wait: bool) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            self.closed_notify.notify_waiters();
            if wait {
                // Owning every permit means every task has finished.
                let _all = self
                    .slots
                    .acquire_many(self.size as u32)
                    .await
                    .expect("pool semaphore closed while draining");
            }
        })
    }
}
