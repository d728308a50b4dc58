//! Tracking for work started with [`Engine::spawn`](crate::Engine::spawn).

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::sync::lock;

/// Counts outstanding async work so shutdown can wait for it.
#[derive(Debug, Default)]
pub struct InflightTracker {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InflightTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one unit of work. It stays outstanding until the guard drops,
    /// including when the work panics.
    pub fn begin(self: &Arc<Self>) -> InflightGuard {
        *lock(&self.count) += 1;
        InflightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        *lock(&self.count)
    }

    /// Block until no work is outstanding.
    pub fn wait(&self) {
        let mut count = lock(&self.count);
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`. Returns whether
    /// the tracker went idle.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = lock(&self.count);
        let (count, _) = self
            .idle
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *count == 0
    }

    fn finish(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Marks one unit of outstanding work; finishes it on drop.
#[derive(Debug)]
pub struct InflightGuard {
    tracker: Arc<InflightTracker>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}
