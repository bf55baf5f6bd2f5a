//! Bounded worker pool for scan lanes, local generation and mesh builds

use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::Result;

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    queued: Arc<AtomicUsize>,
    max_queued: usize,
}

impl WorkerPool {
    /// Create a pool with `threads` workers accepting at most `max_queued`
    /// outstanding tasks through `try_spawn`.
    pub fn new(threads: usize, max_queued: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("farmesh-worker-{}", i))
            .build()
            .map_err(|e| Error::Streaming(format!("failed to build worker pool: {}", e)))?;

        Ok(Self {
            pool,
            queued: Arc::new(AtomicUsize::new(0)),
            max_queued: max_queued.max(1),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks submitted and not yet finished
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Submit a task regardless of the bound
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let queued = self.queued.clone();
        queued.fetch_add(1, Ordering::AcqRel);
        self.pool.spawn(move || {
            let guard = QueuedGuard(queued);
            task();
            drop(guard);
        });
    }

    /// Submit a task if the pool is below its bound. Returns false otherwise.
    pub fn try_spawn<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let admitted = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_queued).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            return false;
        }

        let queued = self.queued.clone();
        self.pool.spawn(move || {
            let guard = QueuedGuard(queued);
            task();
            drop(guard);
        });
        true
    }

    /// Block until every submitted task has finished or `timeout` passes.
    /// Returns true if the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.queued() > 0 {
            if std::time::Instant::now() >= deadline {
                warn!("Worker pool still has {} tasks after {:?}", self.queued(), timeout);
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Decrements the queued counter even if the task panics
struct QueuedGuard(Arc<AtomicUsize>);

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_spawn_runs_tasks() {
        let pool = WorkerPool::new(2, 16).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_try_spawn_bounded() {
        let pool = WorkerPool::new(1, 2).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));

        for _ in 0..2 {
            let rx = release_rx.clone();
            assert!(pool.try_spawn(move || {
                let _ = rx.lock().recv();
            }));
        }
        assert!(!pool.try_spawn(|| {}));
        assert_eq!(pool.queued(), 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert!(pool.try_spawn(|| {}));
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_thread_count() {
        let pool = WorkerPool::new(3, 4).unwrap();
        assert_eq!(pool.threads(), 3);
    }
}
