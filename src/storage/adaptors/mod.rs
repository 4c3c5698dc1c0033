/// Volatile in-process tier, optionally LRU-bounded.
mod mem;
pub use self::mem::*;

/// Durable tier backed by an embedded sled database.
mod sled;
pub use self::sled::*;
