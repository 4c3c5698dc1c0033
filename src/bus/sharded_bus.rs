use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::Event;
use crate::metrics::EVENTS_ENQUEUED_METRIC;
use crate::BusConfig;
use crate::Result;
use crate::SystemError;

/// Consumer side of the bus. Called from one task per shard.
#[cfg_attr(test, mockall::automock)]
pub trait EventHandler: Send + Sync + 'static {
    fn handle(
        &self,
        event: Event,
    );
}

/// Shard index for `key`. Stable across restarts for a fixed shard count.
pub fn shard_for(
    key: &str,
    shards: usize,
) -> usize {
    crc32c::crc32c(key.as_bytes()) as usize % shards
}

pub struct ShardedBus {
    shards: usize,
    buffer_size: usize,

    /// `None` while stopped; senders are swapped out as a whole on close.
    senders: ArcSwapOption<Vec<mpsc::Sender<Event>>>,

    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ShardedBus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ShardedBus")
            .field("shards", &self.shards)
            .field("buffer_size", &self.buffer_size)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ShardedBus {
    pub fn new(
        shards: usize,
        buffer_size: usize,
    ) -> Self {
        Self {
            shards: shards.max(1),
            buffer_size: buffer_size.max(1),
            senders: ArcSwapOption::empty(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.shards, config.shard_buffer_size)
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    pub fn is_running(&self) -> bool {
        self.senders.load().is_some()
    }

    /// Creates the shard queues and spawns one consumer per shard.
    ///
    /// Must be called inside a tokio runtime. Starting a running bus is a no-op.
    pub fn start(
        &self,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        let mut workers = self.workers.lock();
        if self.is_running() {
            debug!("event bus already started");
            return Ok(());
        }

        let mut senders = Vec::with_capacity(self.shards);
        for shard in 0..self.shards {
            let (tx, rx) = mpsc::channel(self.buffer_size);
            senders.push(tx);
            workers.push(tokio::spawn(run_shard(shard, rx, handler.clone())));
        }
        self.senders.store(Some(Arc::new(senders)));

        info!(shards = self.shards, buffer = self.buffer_size, "event bus started");
        Ok(())
    }

    /// Enqueues `event` on its shard, waiting while the shard is full.
    pub async fn send(
        &self,
        event: Event,
    ) -> Result<()> {
        let senders = self.senders.load_full().ok_or(SystemError::BusClosed)?;
        let shard = shard_for(&event.key, senders.len());
        trace!(key = %event.key, shard, "enqueue event");

        senders[shard]
            .send(event)
            .await
            .map_err(|_| SystemError::BusClosed)?;

        EVENTS_ENQUEUED_METRIC
            .with_label_values(&[&shard.to_string()])
            .inc();
        Ok(())
    }

    /// Stops accepting events, lets every shard drain, then joins the workers.
    ///
    /// Idempotent. The bus can be started again afterwards.
    pub async fn close(&self) -> Result<()> {
        let workers = {
            let mut workers = self.workers.lock();
            drop(self.senders.swap(None));
            std::mem::take(&mut *workers)
        };
        if workers.is_empty() {
            return Ok(());
        }

        for worker in workers {
            worker.await?;
        }
        info!("event bus closed");
        Ok(())
    }
}

async fn run_shard(
    shard: usize,
    mut rx: mpsc::Receiver<Event>,
    handler: Arc<dyn EventHandler>,
) {
    debug!(shard, "shard worker started");
    while let Some(event) = rx.recv().await {
        handler.handle(event);
    }
    debug!(shard, "shard worker drained");
}
