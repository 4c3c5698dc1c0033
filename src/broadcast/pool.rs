use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::constants::DROP_REASON_CLOSED;
use crate::constants::DROP_REASON_FULL;
use crate::metrics::DROPPED_MESSAGES_METRIC;
use crate::Clock;

/// Cached broadcast state of one path. Guarded by the pool mutex, which is
/// held for the whole recompute, compare, update and deliver sequence.
#[derive(Debug, Default)]
pub struct PoolState {
    /// Last view sent to members; `None` until first computed
    pub(crate) view: Option<Value>,
    pub(crate) version: u64,
    pub(crate) members: HashMap<u64, mpsc::Sender<Bytes>>,
    /// Set once the pool has been removed from the registry
    pub(crate) retired: bool,
}

impl PoolState {
    /// Stores `view` as the cached view.
    ///
    /// The first view establishes the version from the clock; every later
    /// change bumps it by one. Returns false when `view` equals the cache.
    pub(crate) fn refresh(
        &mut self,
        view: Value,
        clock: &Clock,
    ) -> bool {
        match &self.view {
            Some(cached) if *cached == view => false,
            Some(_) => {
                self.version += 1;
                self.view = Some(view);
                true
            }
            None => {
                self.version = clock.now();
                self.view = Some(view);
                true
            }
        }
    }

    /// Non-blocking fan-out. Slow members miss the message, closed members
    /// are dropped from the pool.
    pub(crate) fn deliver(
        &mut self,
        path: &str,
        message: &Bytes,
    ) {
        self.members.retain(|id, sender| match sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%path, member = id, "subscriber buffer full, message dropped");
                DROPPED_MESSAGES_METRIC
                    .with_label_values(&[DROP_REASON_FULL])
                    .inc();
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%path, member = id, "subscriber gone, removing member");
                DROPPED_MESSAGES_METRIC
                    .with_label_values(&[DROP_REASON_CLOSED])
                    .inc();
                false
            }
        });
    }
}

#[derive(Debug)]
pub struct Pool {
    path: String,
    pinned: AtomicBool,
    state: Mutex<PoolState>,
}

impl Pool {
    fn new(
        path: &str,
        pinned: bool,
    ) -> Self {
        Self {
            path: path.to_string(),
            pinned: AtomicBool::new(pinned),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Pinned pools are kept even without members.
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current version, `None` before the first fetch or subscribe.
    pub fn version(&self) -> Option<u64> {
        let state = self.state.lock();
        state.view.as_ref().map(|_| state.version)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }
}

/// Pools by path, plus member id allocation.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: DashMap<String, Arc<Pool>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl PoolRegistry {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            pools: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Capacity of each member's message channel.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn get(
        &self,
        path: &str,
    ) -> Option<Arc<Pool>> {
        self.pools.get(path).map(|pool| pool.value().clone())
    }

    pub fn get_or_create(
        &self,
        path: &str,
    ) -> Arc<Pool> {
        self.pools
            .entry(path.to_string())
            .or_insert_with(|| {
                trace!(%path, "create pool");
                Arc::new(Pool::new(path, false))
            })
            .value()
            .clone()
    }

    /// Creates a pinned pool for `path`, or pins the existing one.
    pub fn preallocate(
        &self,
        path: &str,
    ) {
        let pool = self
            .pools
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Pool::new(path, true)))
            .value()
            .clone();
        pool.pinned.store(true, Ordering::Release);
        debug!(%path, "preallocated pool");
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Removes member `id`, then reaps the pool if it is left empty.
    pub fn unregister(
        &self,
        path: &str,
        id: u64,
    ) {
        if let Some(pool) = self.get(path) {
            pool.lock().members.remove(&id);
            trace!(%path, member = id, "member unregistered");
        }
        self.reap(path);
    }

    /// Drops the pool for `path` when it is unpinned and has no members.
    pub fn reap(
        &self,
        path: &str,
    ) {
        let removed = self.pools.remove_if(path, |_, pool| {
            if pool.is_pinned() {
                return false;
            }
            let mut state = pool.lock();
            if !state.members.is_empty() {
                return false;
            }
            state.retired = true;
            true
        });
        if removed.is_some() {
            debug!(%path, "pool reaped");
        }
    }

    /// Paths with a live pool.
    pub fn paths(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
