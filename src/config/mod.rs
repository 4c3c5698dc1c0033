//! Configuration management.
//!
//! Settings are merged from several sources, later ones overriding earlier:
//! 1. Type defaults (hardcoded)
//! 2. Configuration file from `CONFIG_PATH` (if set)
//! 3. Runtime override files via [`Settings::with_override_config`]
//! 4. Environment variables with the `TESSERA__` prefix (highest priority)

mod broadcast;
mod bus;
mod node;
mod storage;
pub use broadcast::*;
pub use bus::*;
pub use node::*;
pub use storage::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub(crate) const ENV_PREFIX: &str = "TESSERA";

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Memory and durable tier setup
    #[serde(default)]
    pub storage: StorageConfig,
    /// Sharded event bus parameters
    #[serde(default)]
    pub bus: BusConfig,
    /// Snapshot/patch delivery parameters
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// Caller-facing operation parameters
    #[serde(default)]
    pub node: NodeConfig,
}

impl Debug for Settings {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("storage", &self.storage)
            .field("bus", &self.bus)
            .field("broadcast", &self.broadcast)
            .field("node", &self.node)
            .finish()
    }
}

impl Settings {
    /// Loads configuration from defaults, `CONFIG_PATH` and environment
    /// variables without validation.
    ///
    /// # Example
    /// ```ignore
    /// std::env::set_var("TESSERA__BUS__SHARDS", "8");
    /// let settings = Settings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies an override file on top of the current values. Environment
    /// variables are re-applied last so they keep the highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.storage.validate()?;
        self.validate_sections()?;
        Ok(self)
    }

    /// Validation for callers that supply their own storage tiers.
    pub(crate) fn validate_without_tiers(self) -> Result<Self> {
        self.storage.validate_keys()?;
        self.validate_sections()?;
        Ok(self)
    }

    fn validate_sections(&self) -> Result<()> {
        self.bus.validate()?;
        self.broadcast.validate()?;
        self.node.validate()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("storage.no_broadcast_keys")
}
