use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::is_valid_payload;
use super::merge;
use super::sort_ascending;
use super::LockArena;
use super::Object;
use super::StorageTier;
use crate::bus::Event;
use crate::bus::ShardedBus;
use crate::key;
use crate::Clock;
use crate::Lifecycle;
use crate::LifecycleState;
use crate::LockError;
use crate::Result;
use crate::StorageError;

/// Coordinator over an optional memory tier and an optional durable tier.
pub struct LayeredStorage {
    memory: Option<Arc<dyn StorageTier>>,
    durable: Option<Arc<dyn StorageTier>>,
    clock: Arc<Clock>,
    bus: Option<Arc<ShardedBus>>,
    locks: LockArena,
    /// Serializes read-modify-write sequences per path
    writes: LockArena,
    lifecycle: Lifecycle,
    skip_load: bool,
    no_broadcast_keys: Vec<String>,
}

impl std::fmt::Debug for LayeredStorage {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LayeredStorage")
            .field("memory", &self.memory.as_ref().map(|t| t.name()))
            .field("durable", &self.durable.as_ref().map(|t| t.name()))
            .field("state", &self.lifecycle.state())
            .field("skip_load", &self.skip_load)
            .field("no_broadcast_keys", &self.no_broadcast_keys)
            .finish()
    }
}

impl LayeredStorage {
    pub fn new(
        memory: Option<Arc<dyn StorageTier>>,
        durable: Option<Arc<dyn StorageTier>>,
        clock: Arc<Clock>,
    ) -> Self {
        Self {
            memory,
            durable,
            clock,
            bus: None,
            locks: LockArena::new(),
            writes: LockArena::new(),
            lifecycle: Lifecycle::new(),
            skip_load: false,
            no_broadcast_keys: Vec::new(),
        }
    }

    pub fn with_bus(
        mut self,
        bus: Arc<ShardedBus>,
    ) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Skips warming the memory tier from the durable tier at start.
    pub fn with_skip_load(
        mut self,
        skip_load: bool,
    ) -> Self {
        self.skip_load = skip_load;
        self
    }

    /// Paths (or globs) whose mutations are never broadcast.
    pub fn with_no_broadcast_keys(
        mut self,
        keys: Vec<String>,
    ) -> Self {
        self.no_broadcast_keys = keys;
        self
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Running, with every configured tier active.
    pub fn active(&self) -> bool {
        self.lifecycle.is_running() && self.tiers().all(|tier| tier.active())
    }

    pub fn start(&self) -> Result<()> {
        if self.memory.is_none() && self.durable.is_none() {
            return Err(StorageError::AllLayersNil.into());
        }
        self.lifecycle.begin_start()?;

        if let Err(e) = self.start_tiers() {
            error!("storage start failed: {:?}", e);
            self.lifecycle.abort_start();
            return Err(e);
        }

        self.lifecycle.finish_start()?;
        info!(
            memory = ?self.memory.as_ref().map(|t| t.name()),
            durable = ?self.durable.as_ref().map(|t| t.name()),
            "storage started"
        );
        Ok(())
    }

    fn start_tiers(&self) -> Result<()> {
        if let Some(durable) = &self.durable {
            durable.start()?;
        }
        if let Some(memory) = &self.memory {
            memory.start()?;
        }

        if self.skip_load {
            return Ok(());
        }
        if let (Some(memory), Some(durable)) = (&self.memory, &self.durable) {
            let entries = durable.load()?;
            let count = entries.len();
            for (path, object) in entries {
                memory.set(&path, object)?;
            }
            info!(count, from = durable.name(), to = memory.name(), "warmed memory tier");
        }
        Ok(())
    }

    /// Closes memory then durable. Closing a stopped storage is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.lifecycle.begin_close() {
            debug!("storage is not running, nothing to close");
            return Ok(());
        }

        let mut result = Ok(());
        for tier in self.memory.iter().chain(self.durable.iter()) {
            if let Err(e) = tier.close() {
                error!(tier = tier.name(), "close tier failed: {:?}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        self.lifecycle.finish_close()?;
        info!("storage closed");
        result
    }

    /// Tiers in read order.
    fn tiers(&self) -> impl Iterator<Item = &Arc<dyn StorageTier>> {
        self.memory.iter().chain(self.durable.iter())
    }

    // -
    // Reads

    pub fn get(
        &self,
        path: &str,
    ) -> Result<Object> {
        if key::is_glob(path) {
            return Err(StorageError::GlobNotAllowed(path.to_string()).into());
        }
        key::validate(path)?;
        self.lookup(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()).into())
    }

    /// Memory first; a durable hit is copied back into memory.
    fn lookup(
        &self,
        path: &str,
    ) -> Result<Option<Object>> {
        if let Some(memory) = &self.memory {
            if let Some(object) = memory.get(path)? {
                return Ok(Some(object));
            }
        }
        let Some(durable) = &self.durable else {
            return Ok(None);
        };
        let found = durable.get(path)?;
        if let (Some(object), Some(memory)) = (&found, &self.memory) {
            trace!(%path, "backfill memory tier");
            memory.set(path, object.clone())?;
        }
        Ok(found)
    }

    /// Union of every tier, ascending by `created`.
    pub fn get_list(
        &self,
        pattern: &str,
    ) -> Result<Vec<Object>> {
        if !key::is_glob(pattern) {
            return Err(StorageError::InvalidPattern(pattern.to_string()).into());
        }
        key::validate(pattern)?;

        let mut merged: HashMap<String, Object> = HashMap::new();
        for tier in self.durable.iter().chain(self.memory.iter()) {
            for object in tier.get_list(pattern)? {
                merged.insert(object.path.clone(), object);
            }
        }
        let mut objects: Vec<Object> = merged.into_values().collect();
        sort_ascending(&mut objects);
        Ok(objects)
    }

    pub fn get_list_descending(
        &self,
        pattern: &str,
    ) -> Result<Vec<Object>> {
        let mut objects = self.get_list(pattern)?;
        objects.reverse();
        Ok(objects)
    }

    /// The `limit` most recent objects, newest first. `limit <= 0` returns all.
    pub fn get_n(
        &self,
        pattern: &str,
        limit: i64,
    ) -> Result<Vec<Object>> {
        let mut objects = self.get_list_descending(pattern)?;
        truncate(&mut objects, limit);
        Ok(objects)
    }

    /// The `limit` oldest objects, oldest first. `limit <= 0` returns all.
    pub fn get_n_ascending(
        &self,
        pattern: &str,
        limit: i64,
    ) -> Result<Vec<Object>> {
        let mut objects = self.get_list(pattern)?;
        truncate(&mut objects, limit);
        Ok(objects)
    }

    /// Up to `limit` objects created in `[from, to]`, newest first.
    pub fn get_n_range(
        &self,
        pattern: &str,
        limit: i64,
        from: u64,
        to: u64,
    ) -> Result<Vec<Object>> {
        if limit <= 0 {
            return Err(StorageError::InvalidLimit(limit).into());
        }
        if from > to {
            return Err(StorageError::InvalidRange { from, to }.into());
        }
        let mut objects: Vec<Object> = self
            .get_list_descending(pattern)?
            .into_iter()
            .filter(|o| o.created >= from && o.created <= to)
            .collect();
        truncate(&mut objects, limit);
        Ok(objects)
    }

    /// Keys under `pattern` created in `[from, to]`, ascending by `created`.
    pub fn keys_range(
        &self,
        pattern: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<String>> {
        if !key::is_glob(pattern) {
            return Err(StorageError::InvalidPattern(pattern.to_string()).into());
        }
        if from > to {
            return Err(StorageError::InvalidRange { from, to }.into());
        }
        Ok(self
            .get_list(pattern)?
            .into_iter()
            .filter(|o| o.created >= from && o.created <= to)
            .map(|o| o.path)
            .collect())
    }

    /// Every stored key across all tiers, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = BTreeSet::new();
        for tier in self.tiers() {
            keys.extend(tier.keys()?);
        }
        Ok(keys.into_iter().collect())
    }

    // -
    // Writes

    /// Stores `data` at `path`, keeping the original creation time. Writers to
    /// the same path are serialized, so the first one fixes `created`.
    pub async fn set(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        check_writable(path, &data)?;
        let _write = self.writes.scoped(path).await;

        let now = self.clock.now();
        let object = match self.lookup(path)? {
            Some(existing) => Object {
                created: existing.created,
                updated: now,
                index: existing.index,
                path: existing.path,
                data,
            },
            None => new_object(path, now, data),
        };
        let index = object.index.clone();

        self.write_through(path, object.clone())?;
        debug!(%path, created = object.created, updated = object.updated, "set object");
        self.emit(Event::set(path, object)).await;
        Ok(index)
    }

    /// Stores `data` under a fresh, time-ordered key below the glob `pattern`.
    pub async fn push(
        &self,
        pattern: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        if !key::is_glob(pattern) {
            return Err(StorageError::GlobRequired(pattern.to_string()).into());
        }
        key::validate(pattern)?;
        if !is_valid_payload(&data) {
            return Err(StorageError::InvalidStorageData.into());
        }

        let (path, ts) = key::build(pattern, &self.clock);
        let object = new_object(&path, ts, data);
        let index = object.index.clone();

        self.write_through(&path, object.clone())?;
        debug!(%path, created = ts, "push object");
        self.emit(Event::set(path, object)).await;
        Ok(index)
    }

    /// JSON merge patch of `data` into the object at `path`, or into every
    /// object under a glob. Returns `Noop` when nothing changed.
    pub async fn patch(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        key::validate(path)?;
        merge::parse_patch(&data)?;

        if !key::is_glob(path) {
            return match self.apply_patch(path, &data).await? {
                Some(index) => Ok(index),
                None => Err(StorageError::Noop(path.to_string()).into()),
            };
        }

        let mut changed = 0;
        for existing in self.get_list(path)? {
            match self.apply_patch(&existing.path, &data).await {
                Ok(Some(_)) => changed += 1,
                Ok(None) => {}
                // deleted since the listing
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if changed == 0 {
            return Err(StorageError::Noop(path.to_string()).into());
        }
        debug!(%path, changed, "patched glob");
        Ok(key::GLOB.to_string())
    }

    async fn apply_patch(
        &self,
        path: &str,
        patch: &[u8],
    ) -> Result<Option<String>> {
        let _write = self.writes.scoped(path).await;
        let existing = self
            .lookup(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let Some(data) = merge::merge(&existing.data, patch)? else {
            trace!(path = %existing.path, "patch left object unchanged");
            return Ok(None);
        };
        let object = Object {
            updated: self.clock.now(),
            data,
            ..existing
        };
        let index = object.index.clone();

        self.write_through(path, object.clone())?;
        self.emit(Event::set(path, object)).await;
        Ok(Some(index))
    }

    /// Stores `data` with caller supplied timestamps.
    pub async fn set_with_meta(
        &self,
        path: &str,
        data: Vec<u8>,
        created: u64,
        updated: u64,
    ) -> Result<String> {
        check_writable(path, &data)?;
        let _write = self.writes.scoped(path).await;

        let mut object = new_object(path, created, data);
        object.updated = updated;
        let index = object.index.clone();

        self.write_through(path, object.clone())?;
        self.emit(Event::set(path, object)).await;
        Ok(index)
    }

    fn write_through(
        &self,
        path: &str,
        object: Object,
    ) -> Result<()> {
        if let Some(durable) = &self.durable {
            durable.set(path, object.clone())?;
        }
        if let Some(memory) = &self.memory {
            memory.set(path, object)?;
        }
        Ok(())
    }

    // -
    // Deletes

    /// Deletes `path`, or every key under a glob, and broadcasts the change.
    pub async fn del(
        &self,
        path: &str,
    ) -> Result<()> {
        self.delete(path, true).await
    }

    /// Same as [`LayeredStorage::del`] without broadcasting.
    pub async fn del_silent(
        &self,
        path: &str,
    ) -> Result<()> {
        self.delete(path, false).await
    }

    async fn delete(
        &self,
        path: &str,
        broadcast: bool,
    ) -> Result<()> {
        key::validate(path)?;

        if key::is_glob(path) {
            let removed = self.get_list(path)?;
            for object in &removed {
                let _write = self.writes.scoped(&object.path).await;
                self.remove_everywhere(&object.path)?;
            }
            debug!(%path, count = removed.len(), "deleted glob");
            if broadcast {
                self.emit(Event::del(path, None)).await;
            }
            return Ok(());
        }

        let _write = self.writes.scoped(path).await;
        let object = self
            .lookup(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        self.remove_everywhere(path)?;
        debug!(%path, "deleted object");
        if broadcast {
            self.emit(Event::del(path, Some(object))).await;
        }
        Ok(())
    }

    fn remove_everywhere(
        &self,
        path: &str,
    ) -> Result<()> {
        if let Some(durable) = &self.durable {
            durable.del(path)?;
        }
        if let Some(memory) = &self.memory {
            memory.del(path)?;
        }
        Ok(())
    }

    /// Clears every tier without broadcasting.
    pub fn clear(&self) -> Result<()> {
        for tier in self.tiers() {
            tier.clear()?;
        }
        info!("storage cleared");
        Ok(())
    }

    // -
    // Locking

    /// Waits for the lock on `path`, then reads it. The lock stays held even
    /// when the read fails; release it with `set_and_unlock` or `unlock`.
    pub async fn get_and_lock(
        &self,
        path: &str,
    ) -> Result<Object> {
        if key::is_glob(path) {
            return Err(LockError::CantLockGlob(path.to_string()).into());
        }
        key::validate(path)?;
        self.locks.acquire(path).await;
        self.get(path)
    }

    /// Writes `data` then releases the lock, even when the write fails.
    pub async fn set_and_unlock(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        if !self.locks.is_held(path) {
            return Err(LockError::LockNotFound(path.to_string()).into());
        }
        let result = self.set(path, data).await;
        self.locks.release(path)?;
        result
    }

    pub fn unlock(
        &self,
        path: &str,
    ) -> Result<()> {
        self.locks.release(path)
    }

    // -
    // Broadcast

    fn broadcast_excluded(
        &self,
        path: &str,
    ) -> bool {
        self.no_broadcast_keys
            .iter()
            .any(|pattern| pattern == path || key::matches(pattern, path))
    }

    /// Hands the event to the bus. Never fails the mutation that caused it.
    async fn emit(
        &self,
        event: Event,
    ) {
        let Some(bus) = &self.bus else {
            return;
        };
        if !self.lifecycle.is_running() || self.broadcast_excluded(&event.key) {
            trace!(key = %event.key, "broadcast skipped");
            return;
        }
        let path = event.key.clone();
        if let Err(e) = bus.send(event).await {
            warn!(%path, "broadcast event dropped: {:?}", e);
        }
    }
}

fn check_writable(
    path: &str,
    data: &[u8],
) -> Result<()> {
    if key::is_glob(path) {
        return Err(StorageError::GlobNotAllowed(path.to_string()).into());
    }
    key::validate(path)?;
    if !is_valid_payload(data) {
        return Err(StorageError::InvalidStorageData.into());
    }
    Ok(())
}

fn new_object(
    path: &str,
    created: u64,
    data: Vec<u8>,
) -> Object {
    Object {
        created,
        updated: 0,
        index: key::last_index(path).to_string(),
        path: path.to_string(),
        data,
    }
}

fn truncate(
    objects: &mut Vec<Object>,
    limit: i64,
) {
    if limit > 0 {
        objects.truncate(limit as usize);
    }
}
