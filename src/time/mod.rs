//! Time keeping for the protocol engine
//!
//! Every timestamp the protocol puts on the wire is a difference of two
//! millisecond readings taken from a [`Clock`]:
//!
//! - line-up frames carry the time since the connection was confirmed
//! - line-down frames carry the time the line was held
//!
//! The [`LineUpWatchdog`] bounds the second of these on long holds.

mod watchdog;

use std::sync::atomic::{AtomicU64, Ordering};

pub use self::watchdog::LineUpWatchdog;

/// Source of millisecond timestamps
pub trait Clock: Send + Sync {
    /// Current time in milliseconds
    fn now_millis(&self) -> u64;
}

/// Wall clock, milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
