mod memory_tier;

pub use memory_tier::*;
