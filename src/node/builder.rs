//! A builder for assembling a [`Node`] from [`Settings`].
//!
//! The [`NodeBuilder`] wires the logical clock, the storage tiers, the
//! layered storage coordinator, the sharded event bus and the broadcast
//! dispatcher.
//!
//! ## Key Design Points
//! - **Default Components**: an unbounded or LRU-bounded memory tier, plus a sled tier when
//!   `storage.durable_path` is set.
//! - **Customization**: tiers and filters can be overridden before `build()`.
//!
//! ## Example
//! ```ignore
//! let node = NodeBuilder::new(Settings::new()?)
//!     .with_filters(filters)
//!     .build()?;
//! node.start()?;
//! ```

use std::sync::Arc;

use tracing::debug;
use tracing::info;

use super::Node;
use crate::bus::ShardedBus;
use crate::BroadcastDispatcher;
use crate::Clock;
use crate::Filters;
use crate::LayeredStorage;
use crate::MemoryTier;
use crate::Result;
use crate::Settings;
use crate::SledTier;
use crate::StorageTier;

pub struct NodeBuilder {
    settings: Settings,
    memory: Option<Arc<dyn StorageTier>>,
    durable: Option<Arc<dyn StorageTier>>,
    without_memory: bool,
    filters: Filters,
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("settings", &self.settings)
            .field("memory", &self.memory.as_ref().map(|t| t.name()))
            .field("durable", &self.durable.as_ref().map(|t| t.name()))
            .field("without_memory", &self.without_memory)
            .field("filters", &self.filters)
            .finish()
    }
}

impl NodeBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            memory: None,
            durable: None,
            without_memory: false,
            filters: Filters::new(),
        }
    }

    /// Loads settings from defaults, `CONFIG_PATH` and the environment, then
    /// applies `override_path` if given.
    pub fn from_env(override_path: Option<&str>) -> Result<Self> {
        let mut settings = Settings::new()?;
        if let Some(path) = override_path {
            info!("with_override_config from: {}", path);
            settings = settings.with_override_config(path)?;
        }
        Ok(Self::new(settings))
    }

    /// Replaces the default memory tier.
    pub fn with_memory_tier(
        mut self,
        tier: Arc<dyn StorageTier>,
    ) -> Self {
        self.memory = Some(tier);
        self.without_memory = false;
        self
    }

    /// Replaces the sled tier configured by `storage.durable_path`.
    pub fn with_durable_tier(
        mut self,
        tier: Arc<dyn StorageTier>,
    ) -> Self {
        self.durable = Some(tier);
        self
    }

    /// Runs on the durable tier alone.
    pub fn without_memory_tier(mut self) -> Self {
        self.memory = None;
        self.without_memory = true;
        self
    }

    pub fn with_filters(
        mut self,
        filters: Filters,
    ) -> Self {
        self.filters = filters;
        self
    }

    pub fn build(self) -> Result<Node> {
        let custom_tiers = self.memory.is_some() || self.durable.is_some();
        let settings = if custom_tiers {
            self.settings.validate_without_tiers()?
        } else {
            self.settings.validate()?
        };
        let storage_config = &settings.storage;

        let memory = if self.without_memory || (!storage_config.memory_enabled && self.memory.is_none()) {
            None
        } else {
            Some(self.memory.unwrap_or_else(|| {
                debug!(capacity = storage_config.memory_capacity, "default memory tier");
                let tier: Arc<dyn StorageTier> =
                    Arc::new(MemoryTier::with_capacity(storage_config.memory_capacity));
                tier
            }))
        };

        let durable = match (self.durable, &storage_config.durable_path) {
            (Some(tier), _) => Some(tier),
            (None, Some(path)) => Some(Arc::new(SledTier::open(path)?) as Arc<dyn StorageTier>),
            (None, None) => None,
        };

        let clock = Arc::new(Clock::new());
        let bus = Arc::new(ShardedBus::from_config(&settings.bus));
        let storage = Arc::new(
            LayeredStorage::new(memory, durable, clock)
                .with_bus(bus.clone())
                .with_skip_load(storage_config.skip_load)
                .with_no_broadcast_keys(storage_config.no_broadcast_keys.clone()),
        );
        let filters = Arc::new(self.filters);
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            storage.clone(),
            filters.clone(),
            &settings.broadcast,
        ));

        info!(?settings, "node built");
        Ok(Node::new(Arc::new(settings), storage, bus, dispatcher, filters))
    }
}
