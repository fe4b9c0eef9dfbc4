//! Time sources for event timestamps and synthetic spectra.
//!
//! Sessions never read the clock directly; they receive a millisecond
//! timestamp from a [`TimeSource`] so tests can drive time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Trait representing a millisecond wall-clock used for timestamps.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Time source backed by the system wall clock.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        epoch_ms()
    }
}

/// Wall-clock anchored at creation and advanced by the tokio clock.
///
/// Follows tokio's virtual time when the runtime is paused, which keeps
/// event durations consistent with the timers that produced them.
pub struct TokioTimeSource {
    origin: tokio::time::Instant,
    origin_epoch_ms: u64,
}

impl TokioTimeSource {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            origin_epoch_ms: epoch_ms(),
        }
    }
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioTimeSource {
    fn now_ms(&self) -> u64 {
        self.origin_epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced time source for deterministic tests.
#[derive(Default)]
pub struct ManualTimeSource {
    now_ms: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
