//! Wall clock sources
//!
//! Every timestamp the protocol publishes or compares is epoch milliseconds
//! read through a [`Clock`], so tests can drive time instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in milliseconds since the UNIX epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Thread-safe handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The machine's wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Wall time anchored once, then advanced by tokio's monotonic clock.
///
/// Under a paused tokio runtime (`start_paused = true`) this follows
/// virtual time, which keeps timers and timestamps on the same timeline.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_ms: u64,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(current_time_ms())
    }

    pub fn anchored_at(anchor_ms: u64) -> Self {
        Self {
            anchor_ms,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms + self.start.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_virtual_time() {
        let clock = TokioClock::anchored_at(5_000);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(clock.now_ms(), 6_500);
    }
}
