//! A zero-configuration document store with real-time synchronization.
//!
//! Clients write and read keyed JSON documents and receive live updates over
//! subscriptions. Writes land in a layered storage (memory tier in front of
//! an optional sled tier), are announced on a sharded event bus that keeps
//! per-key order, and are fanned out to subscribers as version-cached
//! snapshots or patches.

pub mod broadcast;
pub mod bus;
mod clock;
mod config;
mod constants;
mod errors;
mod filter;
pub mod key;
mod lifecycle;
pub mod metrics;
mod node;
mod storage;

pub use broadcast::BroadcastDispatcher;
pub use broadcast::Message;
pub use broadcast::Subscription;
pub use broadcast::SubscriptionGuard;
pub use clock::*;
pub use config::*;
pub use errors::*;
pub use filter::*;
pub use lifecycle::*;
pub use node::*;
pub use storage::*;
