//! Single-pass lock for sequential extraction.
//!
//! A solid stream can only be walked front to back, so two passes over the
//! same source must never overlap. Later callers wait for the running pass
//! and then re-check whether it already did their work.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock guarding preload and copy passes of one source.
pub struct PassLock {
    lock: Arc<Mutex<()>>,
}

impl PassLock {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
        }
    }
}

impl Default for PassLock {
    fn default() -> Self {
        Self::new()
    }
}

impl PassLock {
    /// Wait until no other pass runs on this source.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.lock.clone().lock_owned().await
    }

    /// True while a pass holds the lock.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

#[cfg(test)]
#[path = "tests/pass_lock_tests.rs"]
mod tests;
