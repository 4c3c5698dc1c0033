use crate::Object;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Key was inserted, replaced or patched
    Set,
    /// Key, or every key under a glob, was deleted
    Del,
}

/// Mutation notification flowing from storage to the broadcast side.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub key: String,
    pub operation: Operation,
    /// Object after a set, object before a delete; `None` for glob deletes.
    pub object: Option<Object>,
}

impl Event {
    pub fn set(
        key: impl Into<String>,
        object: Object,
    ) -> Self {
        Self {
            key: key.into(),
            operation: Operation::Set,
            object: Some(object),
        }
    }

    pub fn del(
        key: impl Into<String>,
        object: Option<Object>,
    ) -> Self {
        Self {
            key: key.into(),
            operation: Operation::Del,
            object,
        }
    }
}
