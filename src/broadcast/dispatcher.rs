use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::diff;
use super::format_version;
use super::Message;
use super::Pool;
use super::PoolRegistry;
use super::PoolState;
use super::Subscription;
use crate::bus::Event;
use crate::bus::EventHandler;
use crate::bus::Operation;
use crate::constants::MESSAGE_KIND_PATCH;
use crate::constants::MESSAGE_KIND_SNAPSHOT;
use crate::key;
use crate::list_view;
use crate::metrics::BROADCAST_MESSAGES_METRIC;
use crate::BroadcastConfig;
use crate::Clock;
use crate::Filters;
use crate::LayeredStorage;
use crate::Object;
use crate::PatchMode;
use crate::Result;

/// Turns storage events into per-pool snapshot or patch messages.
pub struct BroadcastDispatcher {
    storage: Arc<LayeredStorage>,
    filters: Arc<Filters>,
    pools: Arc<PoolRegistry>,
    clock: Arc<Clock>,
    mode: PatchMode,
}

impl std::fmt::Debug for BroadcastDispatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BroadcastDispatcher")
            .field("pools", &self.pools.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl BroadcastDispatcher {
    pub fn new(
        storage: Arc<LayeredStorage>,
        filters: Arc<Filters>,
        config: &BroadcastConfig,
    ) -> Self {
        let clock = storage.clock().clone();
        Self {
            storage,
            filters,
            pools: Arc::new(PoolRegistry::new(config.connection_buffer_size)),
            clock,
            mode: config.patch_mode,
        }
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    /// Filtered view of `path` as subscribers see it.
    ///
    /// A missing object, or one the read filter blanks out, is the empty
    /// sentinel. A glob yields the list view.
    pub fn view(
        &self,
        path: &str,
    ) -> Result<Value> {
        if key::is_glob(path) {
            let objects = self.storage.get_list(path)?;
            let objects = self.filters.read_list(path, objects)?;
            return Ok(list_view(&objects));
        }
        match self.storage.get(path) {
            Ok(object) => {
                let object = self.filters.read_object(path, object)?;
                if object.is_empty() {
                    Ok(Object::empty().to_view())
                } else {
                    Ok(object.to_view())
                }
            }
            Err(e) if e.is_not_found() => Ok(Object::empty().to_view()),
            Err(e) => Err(e),
        }
    }

    /// Joins the pool of `path`.
    ///
    /// A snapshot is queued first unless `client_version` already matches the
    /// current version.
    pub fn subscribe(
        &self,
        path: &str,
        client_version: Option<&str>,
    ) -> Result<Subscription> {
        key::validate(path)?;
        loop {
            let pool = self.pools.get_or_create(path);
            match self.join(&pool, client_version) {
                Ok(Some(subscription)) => return Ok(subscription),
                Ok(None) => trace!(%path, "pool retired during subscribe, retrying"),
                Err(e) => {
                    self.pools.reap(path);
                    return Err(e);
                }
            }
        }
    }

    fn join(
        &self,
        pool: &Pool,
        client_version: Option<&str>,
    ) -> Result<Option<Subscription>> {
        let path = pool.path();
        let mut state = pool.lock();
        if state.retired {
            return Ok(None);
        }

        let view = self.view(path)?;
        self.advance(path, &mut state, view);
        let version = format_version(state.version);

        let (tx, rx) = mpsc::channel(self.pools.buffer_size());
        if client_version != Some(version.as_str()) {
            let message = Message::snapshot(cached_view(&state), state.version).encode()?;
            // Fresh channel with capacity >= 1, cannot be full.
            let _ = tx.try_send(message);
            BROADCAST_MESSAGES_METRIC
                .with_label_values(&[MESSAGE_KIND_SNAPSHOT])
                .inc();
        } else {
            debug!(%path, %version, "client is up to date, no snapshot sent");
        }

        let id = self.pools.next_id();
        state.members.insert(id, tx);
        debug!(%path, member = id, members = state.members.len(), "member subscribed");

        Ok(Some(Subscription::new(id, path, version, rx, self.pools.clone())))
    }

    /// Current encoded view of `path` and its version.
    ///
    /// A pool left without members afterwards is reaped, so the version of an
    /// unsubscribed path only holds while some pool for it is alive.
    pub fn fetch(
        &self,
        path: &str,
    ) -> Result<(Bytes, String)> {
        key::validate(path)?;
        let result = loop {
            let pool = self.pools.get_or_create(path);
            let mut state = pool.lock();
            if state.retired {
                continue;
            }
            break self.view(path).and_then(|view| {
                self.advance(path, &mut state, view);
                let encoded = Bytes::from(serde_json::to_vec(&cached_view(&state))?);
                Ok((encoded, format_version(state.version)))
            });
        };
        self.pools.reap(path);
        result
    }

    /// Pins pools for statically known paths. Invalid paths are skipped.
    pub fn preallocate(
        &self,
        paths: &[String],
    ) {
        for path in paths {
            if key::is_valid(path) {
                self.pools.preallocate(path);
            } else {
                warn!(%path, "skip preallocation of invalid path");
            }
        }
    }

    /// Pools touched by `event`: its key, the glob listing it and, for a glob
    /// delete, every pool under that glob.
    fn affected_paths(
        &self,
        event: &Event,
    ) -> Vec<String> {
        let mut paths = vec![event.key.clone()];
        match key::parent_glob(&event.key) {
            Some(parent) => paths.push(parent),
            None if event.operation == Operation::Del => paths.extend(
                self.pools
                    .paths()
                    .into_iter()
                    .filter(|p| key::matches(&event.key, p)),
            ),
            None => {}
        }
        paths
    }

    fn broadcast(
        &self,
        pool: &Pool,
    ) {
        let path = pool.path();
        let mut state = pool.lock();
        if state.retired {
            return;
        }

        let view = match self.view(path) {
            Ok(view) => view,
            Err(e) => {
                warn!(%path, "view unavailable, broadcast skipped: {:?}", e);
                return;
            }
        };
        if !self.advance(path, &mut state, view) {
            trace!(%path, "view unchanged");
        }
    }

    /// Caches `view` and, when it differs from the cached one, sends the
    /// change to the current members. Returns false when nothing changed.
    ///
    /// Every cache update goes through here, so members never fall behind the
    /// cached version regardless of which call observed the change first.
    fn advance(
        &self,
        path: &str,
        state: &mut PoolState,
        view: Value,
    ) -> bool {
        let previous = state.view.clone();
        if !state.refresh(view, &self.clock) {
            return false;
        }
        if state.members.is_empty() {
            return true;
        }

        match self.compose(previous.as_ref(), state) {
            Ok((message, kind)) => {
                BROADCAST_MESSAGES_METRIC.with_label_values(&[kind]).inc();
                trace!(%path, kind, version = state.version, "deliver");
                state.deliver(path, &message);
            }
            Err(e) => warn!(%path, "message encoding failed: {:?}", e),
        }
        true
    }

    /// Picks snapshot or patch for the freshly cached view.
    fn compose(
        &self,
        previous: Option<&Value>,
        state: &PoolState,
    ) -> Result<(Bytes, &'static str)> {
        let current = cached_view(state);
        let version = state.version;
        let Some(previous) = previous else {
            return Ok((Message::snapshot(current, version).encode()?, MESSAGE_KIND_SNAPSHOT));
        };

        let patch = match self.mode {
            PatchMode::NoPatch => None,
            PatchMode::Auto | PatchMode::ForcePatch => {
                match Message::patch(&diff(previous, &current), version).and_then(|m| m.encode()) {
                    Ok(encoded) => Some(encoded),
                    Err(e) => {
                        debug!("patch encoding failed, falling back to snapshot: {:?}", e);
                        None
                    }
                }
            }
        };

        match (self.mode, patch) {
            (PatchMode::ForcePatch, Some(patch)) => Ok((patch, MESSAGE_KIND_PATCH)),
            (PatchMode::Auto, Some(patch)) => {
                let snapshot = Message::snapshot(current, version).encode()?;
                if patch.len() < snapshot.len() {
                    Ok((patch, MESSAGE_KIND_PATCH))
                } else {
                    Ok((snapshot, MESSAGE_KIND_SNAPSHOT))
                }
            }
            _ => Ok((Message::snapshot(current, version).encode()?, MESSAGE_KIND_SNAPSHOT)),
        }
    }
}

fn cached_view(state: &PoolState) -> Value {
    state.view.clone().unwrap_or(Value::Null)
}

impl EventHandler for BroadcastDispatcher {
    fn handle(
        &self,
        event: Event,
    ) {
        trace!(key = %event.key, operation = ?event.operation, "dispatch event");
        for path in self.affected_paths(&event) {
            if let Some(pool) = self.pools.get(&path) {
                self.broadcast(&pool);
            }
        }
    }
}
