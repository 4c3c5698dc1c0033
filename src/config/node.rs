use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    /// Deadline for every caller-facing read, write and delete (milliseconds).
    /// Expiry aborts the response but does not undo a completed tier write.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_in_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            operation_timeout_in_ms: default_operation_timeout(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "node.operation_timeout_in_ms must be at least 1ms".into(),
            )));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_in_ms)
    }
}

// in ms
fn default_operation_timeout() -> u64 {
    10_000
}
