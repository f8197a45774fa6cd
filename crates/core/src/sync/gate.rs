use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

pub type GateGuard = OwnedMutexGuard<()>;

/// Serializes critical sections per bot instance.
///
/// Waiters are admitted in FIFO order. An error returned by one holder is
/// handed back to that caller only; the next queued caller still runs.
#[derive(Clone, Debug, Default)]
pub struct Gate {
    lock: Arc<Mutex<()>>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_exclusive<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock.lock().await;
        operation().await
    }

    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Holds the gate until the returned guard is dropped, which lets a spawned round keep it.
    pub async fn acquire(&self) -> GateGuard {
        Arc::clone(&self.lock).lock_owned().await
    }

    pub fn try_acquire(&self) -> Option<GateGuard> {
        Arc::clone(&self.lock).try_lock_owned().ok()
    }
}
