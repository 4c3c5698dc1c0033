// -
// Database namespaces

/// Sled tree holding every persisted object, keyed by path
pub(crate) const OBJECTS_TREE: &str = "_tessera_objects";

// -
// Broadcast metric labels

pub(crate) const MESSAGE_KIND_SNAPSHOT: &str = "snapshot";
pub(crate) const MESSAGE_KIND_PATCH: &str = "patch";

pub(crate) const DROP_REASON_FULL: &str = "full";
pub(crate) const DROP_REASON_CLOSED: &str = "closed";
