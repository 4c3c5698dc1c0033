use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::key;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Keep an in-memory tier in front of the durable one
    #[serde(default = "default_memory_enabled")]
    pub memory_enabled: bool,

    /// Maximum number of objects held in memory; 0 means unbounded.
    /// A bounded memory tier evicts least recently used objects.
    #[serde(default)]
    pub memory_capacity: usize,

    /// Directory of the sled database backing the durable tier
    #[serde(default)]
    pub durable_path: Option<PathBuf>,

    /// Skip warming the memory tier from the durable tier at start
    #[serde(default)]
    pub skip_load: bool,

    /// Paths (or globs) whose writes are never broadcast
    #[serde(default)]
    pub no_broadcast_keys: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_enabled: default_memory_enabled(),
            memory_capacity: 0,
            durable_path: None,
            skip_load: false,
            no_broadcast_keys: Vec::new(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.memory_enabled && self.durable_path.is_none() {
            return Err(Error::Config(ConfigError::Message(
                "storage requires memory_enabled or a durable_path".into(),
            )));
        }
        self.validate_keys()
    }

    /// Checks everything except tier selection.
    pub(crate) fn validate_keys(&self) -> Result<()> {
        if let Some(path) = self.no_broadcast_keys.iter().find(|p| !key::is_valid(p)) {
            return Err(Error::Config(ConfigError::Message(format!(
                "no_broadcast_keys contains an invalid path: {}",
                path
            ))));
        }

        Ok(())
    }
}

fn default_memory_enabled() -> bool {
    true
}
