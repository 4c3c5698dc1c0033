//! Sharded event bus decoupling writers from broadcasters.
//!
//! Events are routed by a stable hash of their key to one of a fixed number
//! of bounded queues. Each queue is drained by exactly one consumer task, so
//! events for the same key are handled in the order they were sent.

mod event;
mod sharded_bus;

pub use event::*;
pub use sharded_bus::*;
