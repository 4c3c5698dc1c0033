use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::PatchOp;
use crate::Result;

/// Wire message sent to subscribers.
///
/// `data` is the full view when `snapshot` is true, otherwise the list of
/// patch operations turning the previous view into the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub snapshot: bool,
    pub version: String,
    pub data: Value,
}

impl Message {
    pub fn snapshot(
        view: Value,
        version: u64,
    ) -> Self {
        Self {
            snapshot: true,
            version: format_version(version),
            data: view,
        }
    }

    pub fn patch(
        ops: &[PatchOp],
        version: u64,
    ) -> Result<Self> {
        Ok(Self {
            snapshot: false,
            version: format_version(version),
            data: serde_json::to_value(ops)?,
        })
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Patch operations carried by a non-snapshot message.
    pub fn ops(&self) -> Result<Vec<PatchOp>> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Versions travel as lowercase hex.
pub fn format_version(version: u64) -> String {
    format!("{:x}", version)
}

pub fn parse_version(version: &str) -> Option<u64> {
    u64::from_str_radix(version, 16).ok()
}
