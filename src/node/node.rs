//! The caller-facing document store node.
//!
//! ## Key Responsibilities
//! - Runs the `Stopped -> Starting -> Running -> Closing` lifecycle of storage and bus
//! - Applies write, delete, read and after-write filters around storage calls
//! - Bounds every operation by `node.operation_timeout_in_ms`
//!
//! ## Example Usage
//! ```ignore
//! let node = NodeBuilder::new(Settings::default()).build()?;
//! node.start()?;
//! node.set("users/alice", br#"{"age":30}"#.to_vec()).await?;
//! let mut subscription = node.subscribe("users/*", None).await?;
//! node.close().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::bus::ShardedBus;
use crate::key;
use crate::metrics;
use crate::BroadcastDispatcher;
use crate::Filters;
use crate::LayeredStorage;
use crate::Lifecycle;
use crate::LifecycleState;
use crate::Object;
use crate::Result;
use crate::Settings;
use crate::StorageError;
use crate::Subscription;
use crate::SystemError;

pub struct Node {
    settings: Arc<Settings>,
    storage: Arc<LayeredStorage>,
    bus: Arc<ShardedBus>,
    dispatcher: Arc<BroadcastDispatcher>,
    filters: Arc<Filters>,
    lifecycle: Lifecycle,
    timeout: Duration,
}

impl std::fmt::Debug for Node {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.lifecycle.state())
            .field("storage", &self.storage)
            .field("bus", &self.bus)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        settings: Arc<Settings>,
        storage: Arc<LayeredStorage>,
        bus: Arc<ShardedBus>,
        dispatcher: Arc<BroadcastDispatcher>,
        filters: Arc<Filters>,
    ) -> Self {
        let timeout = settings.node.operation_timeout();
        Self {
            settings,
            storage,
            bus,
            dispatcher,
            filters,
            lifecycle: Lifecycle::new(),
            timeout,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<LayeredStorage> {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Arc<BroadcastDispatcher> {
        &self.dispatcher
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Starts storage, then the bus workers, then pins the read-filter pools.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.lifecycle.begin_start()?;
        if let Err(e) = self.start_components() {
            error!("node start failed: {:?}", e);
            if let Err(e) = self.storage.close() {
                warn!("storage rollback failed: {:?}", e);
            }
            self.lifecycle.abort_start();
            return Err(e);
        }
        self.lifecycle.finish_start()?;
        info!("node started");
        Ok(())
    }

    fn start_components(&self) -> Result<()> {
        metrics::register_custom_metrics();
        self.storage.start()?;
        self.bus.start(self.dispatcher.clone())?;
        self.dispatcher.preallocate(&self.filters.static_paths());
        Ok(())
    }

    /// Drains and joins the bus, then closes storage. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if !self.lifecycle.begin_close() {
            debug!("node is not running, nothing to close");
            return Ok(());
        }
        let bus_result = self.bus.close().await;
        let storage_result = self.storage.close();
        self.lifecycle.finish_close()?;
        info!("node closed");
        bus_result?;
        storage_result
    }

    /// Runs `operation` when the node is running, bounded by the operation
    /// timeout. Expiry does not undo tier writes that already completed.
    async fn with_deadline<T, F>(
        &self,
        name: &'static str,
        operation: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.lifecycle.is_running() {
            return Err(SystemError::NotRunning.into());
        }
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation = name, timeout = ?self.timeout, "operation timed out");
                Err(SystemError::Timeout(self.timeout).into())
            }
        }
    }

    // -
    // Reads

    /// Reads one object through the read filter. A filter returning the empty
    /// object hides it.
    pub async fn get(
        &self,
        path: &str,
    ) -> Result<Object> {
        self.with_deadline("get", async {
            let object = self.storage.get(path)?;
            let object = self.filters.read_object(path, object)?;
            if object.is_empty() {
                return Err(StorageError::NotFound(path.to_string()).into());
            }
            Ok(object)
        })
        .await
    }

    pub async fn get_list(
        &self,
        pattern: &str,
    ) -> Result<Vec<Object>> {
        self.with_deadline("get_list", async {
            let objects = self.storage.get_list(pattern)?;
            self.filters.read_list(pattern, objects)
        })
        .await
    }

    pub async fn keys_range(
        &self,
        pattern: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<String>> {
        self.with_deadline("keys_range", async { self.storage.keys_range(pattern, from, to) })
            .await
    }

    // -
    // Writes

    pub async fn set(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.with_deadline("set", async {
            let data = self.filters.write(path, data)?;
            let index = self.storage.set(path, data).await?;
            self.filters.after_write(path);
            Ok(index)
        })
        .await
    }

    pub async fn push(
        &self,
        pattern: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.with_deadline("push", async {
            let data = self.filters.write(pattern, data)?;
            let index = self.storage.push(pattern, data).await?;
            self.filters
                .after_write(&format!("{}{}", key::glob_prefix(pattern), index));
            Ok(index)
        })
        .await
    }

    /// Merge-patches the object at `path`, or every object under a glob.
    /// An unchanged result is reported as `Noop`.
    pub async fn patch(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.with_deadline("patch", async {
            let data = self.filters.write(path, data)?;
            let index = self.storage.patch(path, data).await?;
            self.filters.after_write(path);
            Ok(index)
        })
        .await
    }

    /// Stores `data` with caller supplied timestamps, bypassing filters.
    pub async fn set_with_meta(
        &self,
        path: &str,
        data: Vec<u8>,
        created: u64,
        updated: u64,
    ) -> Result<String> {
        self.with_deadline("set_with_meta", self.storage.set_with_meta(path, data, created, updated))
            .await
    }

    pub async fn del(
        &self,
        path: &str,
    ) -> Result<()> {
        self.with_deadline("del", async {
            self.filters.delete(path)?;
            self.storage.del(path).await?;
            self.filters.after_write(path);
            Ok(())
        })
        .await
    }

    // -
    // Locking

    /// Waits for the lock on `path` and reads the unfiltered object.
    pub async fn get_and_lock(
        &self,
        path: &str,
    ) -> Result<Object> {
        self.with_deadline("get_and_lock", self.storage.get_and_lock(path))
            .await
    }

    /// Writes through the write filter and releases the lock. A rejected
    /// write still releases it.
    pub async fn set_and_unlock(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.with_deadline("set_and_unlock", async {
            let data = match self.filters.write(path, data) {
                Ok(data) => data,
                Err(e) => {
                    self.storage.unlock(path)?;
                    return Err(e);
                }
            };
            let index = self.storage.set_and_unlock(path, data).await?;
            self.filters.after_write(path);
            Ok(index)
        })
        .await
    }

    pub async fn unlock(
        &self,
        path: &str,
    ) -> Result<()> {
        self.with_deadline("unlock", async { self.storage.unlock(path) })
            .await
    }

    // -
    // Broadcast

    /// Joins the pool of `path`. No snapshot is sent when `version` is current.
    pub async fn subscribe(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<Subscription> {
        self.with_deadline("subscribe", async { self.dispatcher.subscribe(path, version) })
            .await
    }

    /// Encoded filtered view of `path` with its version.
    pub async fn fetch(
        &self,
        path: &str,
    ) -> Result<(Bytes, String)> {
        self.with_deadline("fetch", async { self.dispatcher.fetch(path) })
            .await
    }
}
