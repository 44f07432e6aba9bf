//! Monotonic second clocks.
//!
//! Detection throttling and telemetry timestamps are expressed in whole
//! seconds from an arbitrary epoch (agent start). Tests drive time by hand
//! through [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic seconds.
pub trait Clock: Send + Sync {
    /// Seconds elapsed since an arbitrary, fixed epoch. Never decreases.
    fn now_secs(&self) -> u64;
}

/// Wall-independent clock backed by [`Instant`], epoch = construction time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_secs(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(start_secs),
        }
    }

    /// Jump to an absolute time. Moving backwards is ignored.
    pub fn set(&self, secs: u64) {
        self.secs.fetch_max(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_secs(&self) -> u64 {
        (**self).now_secs()
    }
}
