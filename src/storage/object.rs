use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

/// A stored document.
///
/// `created` is fixed at first write; `updated` stays 0 until the object is
/// modified and is strictly greater than `created` afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub created: u64,
    pub updated: u64,
    pub index: String,
    pub path: String,
    pub data: Vec<u8>,
}

impl Object {
    /// The sentinel view used for absent objects.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A read filter returning `created == 0` signals "not found".
    pub fn is_empty(&self) -> bool {
        self.created == 0
    }

    /// JSON view delivered to readers and subscribers.
    pub fn to_view(&self) -> Value {
        json!({
            "created": self.created,
            "updated": self.updated,
            "index": self.index,
            "path": self.path,
            "data": payload_view(&self.data),
        })
    }
}

pub fn list_view(objects: &[Object]) -> Value {
    Value::Array(objects.iter().map(Object::to_view).collect())
}

/// True when `data` is a non-empty JSON document.
pub fn is_valid_payload(data: &[u8]) -> bool {
    !data.is_empty() && serde_json::from_slice::<serde::de::IgnoredAny>(data).is_ok()
}

fn payload_view(data: &[u8]) -> Value {
    if data.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_slice(data)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(data).into_owned()))
}
