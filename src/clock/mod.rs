//! Logical clock used both as a timestamp source and as a sortable
//! unique suffix for generated keys.


use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Strictly increasing nanosecond clock.
///
/// Every value returned by [`Clock::now`] is greater than every value issued
/// before it, even when the wall clock stalls or jumps backwards.
#[derive(Debug, Default)]
pub struct Clock {
    last_issued: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last_issued: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> u64 {
        let wall = wall_clock_nanos();
        let mut last = self.last_issued.load(Ordering::Acquire);
        loop {
            let next = wall.max(last + 1);
            match self.last_issued.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Last value handed out, 0 if the clock was never read.
    pub fn last(&self) -> u64 {
        self.last_issued.load(Ordering::Acquire)
    }

    /// Fixed-width lowercase hex, so lexical order equals numeric order.
    pub fn format(ts: u64) -> String {
        format!("{:016x}", ts)
    }
}

fn wall_clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
