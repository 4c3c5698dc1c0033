use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

use crate::LockError;
use crate::Result;

/// Path-keyed mutual exclusion handles.
///
/// A lock is created on first use and never evicted. Acquiring stores the
/// owned guard in `held`, so the lock survives across calls until
/// [`LockArena::release`] drops it, possibly from a different task.
#[derive(Debug, Default)]
pub struct LockArena {
    locks: DashMap<String, Arc<Mutex<()>>>,
    held: DashMap<String, OwnedMutexGuard<()>>,
}

impl LockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `path` is free, then holds it.
    pub async fn acquire(
        &self,
        path: &str,
    ) {
        let lock = self.locks.entry(path.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        self.held.insert(path.to_string(), guard);
        trace!(%path, "lock acquired");
    }

    /// Waits for the lock on `path` and hands the guard to the caller. The
    /// lock is released when the guard drops; `held` is not touched.
    pub async fn scoped(
        &self,
        path: &str,
    ) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(path.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    pub fn release(
        &self,
        path: &str,
    ) -> Result<()> {
        match self.held.remove(path) {
            Some(_) => {
                trace!(%path, "lock released");
                Ok(())
            }
            None => Err(LockError::LockNotFound(path.to_string()).into()),
        }
    }

    pub fn is_held(
        &self,
        path: &str,
    ) -> bool {
        self.held.contains_key(path)
    }

    /// Number of lock handles ever created.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
