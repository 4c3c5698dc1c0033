use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// How a changed view is delivered to subscribers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    /// Smaller of snapshot and patch
    #[default]
    Auto,
    /// Always a full snapshot
    NoPatch,
    /// Always a patch once a prior view exists, even if larger
    ForcePatch,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BroadcastConfig {
    #[serde(default)]
    pub patch_mode: PatchMode,

    /// Messages buffered per connection. Deliveries to a full buffer are dropped.
    #[serde(default = "default_connection_buffer_size")]
    pub connection_buffer_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            patch_mode: PatchMode::default(),
            connection_buffer_size: default_connection_buffer_size(),
        }
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connection_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "broadcast.connection_buffer_size must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_connection_buffer_size() -> usize {
    32
}
