//! Layered document storage.
//!
//! A [`LayeredStorage`] coordinates up to two [`StorageTier`]s: a fast
//! volatile tier and a durable one. Reads go memory first and backfill on a
//! miss; writes go durable first, then memory, and are announced on the
//! event bus.

mod adaptors;
mod layered;
mod lock_arena;
pub mod merge;
mod object;
mod tier;

pub use adaptors::*;
pub use layered::*;
pub use lock_arena::*;
pub use object::*;
pub use tier::*;

#[cfg(test)]
mod layered_test;
