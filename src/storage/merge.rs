//! JSON merge patch (RFC 7386) over stored payloads.

use serde_json::Map;
use serde_json::Value;

use crate::Result;
use crate::StorageError;

/// Merges `patch` into `original`.
///
/// Returns `None` when the merge leaves the document unchanged.
pub fn merge(
    original: &[u8],
    patch: &[u8],
) -> Result<Option<Vec<u8>>> {
    let patch = parse_patch(patch)?;
    let before: Value =
        serde_json::from_slice(original).map_err(|_| StorageError::InvalidStorageData)?;

    let mut after = before.clone();
    merge_patch(&mut after, &patch);
    if after == before {
        return Ok(None);
    }

    let encoded = serde_json::to_vec(&after).map_err(|_| StorageError::InvalidStorageData)?;
    Ok(Some(encoded))
}

/// A merge patch must be a JSON object.
pub fn parse_patch(patch: &[u8]) -> Result<Value> {
    match serde_json::from_slice::<Value>(patch) {
        Ok(value) if value.is_object() => Ok(value),
        _ => Err(StorageError::InvalidStorageData.into()),
    }
}

pub fn merge_patch(
    target: &mut Value,
    patch: &Value,
) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                for (name, value) in fields {
                    if value.is_null() {
                        map.remove(name);
                    } else {
                        merge_patch(map.entry(name.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}
