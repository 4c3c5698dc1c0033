mod sled_tier;

pub use sled_tier::*;
