//! Drift measurement for playback sync
//!
//! Works out where the room's playhead should be right now and keeps a
//! short history of how far the local player was from it.

use std::collections::VecDeque;

/// Drift (seconds) tolerated before the local player is re-seeked
pub const DRIFT_THRESHOLD_SECS: f64 = 0.5;

/// Number of drift samples to keep for averaging
const DRIFT_SAMPLE_COUNT: usize = 5;

/// Position (seconds) a room's playhead should be at `now_ms`.
///
/// Paused rooms stay where they were published. Playing rooms advance by
/// the time elapsed since the publisher's `updated_at`. A publisher whose
/// clock runs ahead of ours yields negative elapsed time; the result never
/// drops below zero.
pub fn expected_position(position: f64, is_playing: bool, updated_at_ms: u64, now_ms: u64) -> f64 {
    if !is_playing {
        return position;
    }
    let elapsed_ms = now_ms as i64 - updated_at_ms as i64;
    (position + elapsed_ms as f64 / 1000.0).max(0.0)
}

/// One drift measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSample {
    /// Local position minus expected position (positive = ahead)
    pub drift_secs: f64,
    /// Whether this measurement triggered a seek
    pub corrected: bool,
}

/// Rolling drift history for one session
#[derive(Debug, Default)]
pub struct DriftTracker {
    samples: VecDeque<DriftSample>,
    corrections: u64,
}

impl DriftTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&mut self, drift_secs: f64, corrected: bool) {
        if self.samples.len() >= DRIFT_SAMPLE_COUNT {
            self.samples.pop_front();
        }
        self.samples.push_back(DriftSample {
            drift_secs,
            corrected,
        });
        if corrected {
            self.corrections += 1;
        }

        tracing::trace!(
            "Drift sample {:+.3}s (corrected: {}, mean |drift|: {:.3}s)",
            drift_secs,
            corrected,
            self.mean_abs_drift()
        );
    }

    /// Most recent drift, if any was measured
    pub fn last_drift(&self) -> Option<f64> {
        self.samples.back().map(|s| s.drift_secs)
    }

    /// Mean absolute drift over the sample window
    pub fn mean_abs_drift(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|s| s.drift_secs.abs()).sum();
        sum / self.samples.len() as f64
    }

    /// Total seeks performed to correct drift
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn samples(&self) -> impl Iterator<Item = &DriftSample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.corrections = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_position_playing() {
        // Published at 0s, three seconds ago
        assert_eq!(expected_position(0.0, true, 10_000, 13_000), 3.0);
        assert_eq!(expected_position(42.0, true, 10_000, 10_500), 42.5);
    }

    #[test]
    fn test_expected_position_paused_ignores_elapsed() {
        assert_eq!(expected_position(42.0, false, 10_000, 99_000), 42.0);
    }

    #[test]
    fn test_expected_position_publisher_clock_ahead() {
        // Publisher's clock is 2s ahead of ours
        assert_eq!(expected_position(10.0, true, 12_000, 10_000), 8.0);
        assert_eq!(expected_position(1.0, true, 12_000, 10_000), 0.0);
    }

    #[test]
    fn test_tracker_window() {
        let mut tracker = DriftTracker::new();
        assert_eq!(tracker.last_drift(), None);
        assert_eq!(tracker.mean_abs_drift(), 0.0);

        tracker.add_sample(2.0, true);
        for _ in 0..DRIFT_SAMPLE_COUNT {
            tracker.add_sample(-0.1, false);
        }

        // The 2.0s sample fell out of the window
        assert_eq!(tracker.samples().count(), DRIFT_SAMPLE_COUNT);
        assert!((tracker.mean_abs_drift() - 0.1).abs() < 1e-9);
        assert_eq!(tracker.last_drift(), Some(-0.1));
        assert_eq!(tracker.corrections(), 1);

        tracker.clear();
        assert_eq!(tracker.corrections(), 0);
    }
}
