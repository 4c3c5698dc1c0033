use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    /// Number of independent shard queues. A key always maps to the same shard.
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Events buffered per shard before writers are blocked
    #[serde(default = "default_shard_buffer_size")]
    pub shard_buffer_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            shard_buffer_size: default_shard_buffer_size(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(Error::Config(ConfigError::Message(
                "bus.shards must be greater than 0".into(),
            )));
        }
        if self.shard_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "bus.shard_buffer_size must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_shards() -> usize {
    6
}
fn default_shard_buffer_size() -> usize {
    100
}
