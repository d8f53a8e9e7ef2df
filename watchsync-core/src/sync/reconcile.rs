//! State Reconciliation Engine
//!
//! Drives the local player toward the room's RoomState: item first, then
//! transport, then playhead. Remote snapshots that race our own writes, or
//! arrive right after a seek, are held back and applied once things settle.

use tracing::{debug, info, warn};

use super::state::{RoomPatch, RoomState};
use crate::drift::{DriftTracker, DRIFT_THRESHOLD_SECS};
use crate::player::{PlayerAdapter, PlayerError, PlayerStatus};

/// Minimum gap (ms) after a seek before another snapshot is applied
pub const QUIESCENCE_MS: u64 = 500;

/// Why a snapshot was held back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// One of our writes is still on its way through the store
    InFlight,
    /// A seek was applied too recently
    Quiescent,
}

/// What the engine did with one snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Applied(ApplyReport),
    Echo,
    Deferred(Gate),
}

/// Adapter commands issued by one apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub loaded: Option<String>,
    pub played: bool,
    pub paused: bool,
    pub seeked_to: Option<f64>,
    /// Local minus expected position, when it could be measured
    pub drift: Option<f64>,
    /// The player sat at the end of the room's item; transport left alone
    pub skipped_ended: bool,
    pub errors: u32,
}

impl ApplyReport {
    /// Whether any command reached the player
    pub fn acted(&self) -> bool {
        self.loaded.is_some() || self.played || self.paused || self.seeked_to.is_some()
    }
}

/// Sync health as seen by this client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub last_drift_secs: Option<f64>,
    pub mean_abs_drift_secs: f64,
    pub corrections: u64,
    pub echoes_suppressed: u64,
    pub snapshots_applied: u64,
    pub snapshots_deferred: u64,
    /// A snapshot is waiting for a gate to open
    pub deferred: bool,
}

/// Per-session reconciliation state
#[derive(Debug)]
pub struct Reconciler {
    drift_threshold: f64,
    quiescence_ms: u64,
    /// Last known RoomState (the drift baseline)
    baseline: Option<RoomState>,
    deferred: bool,
    last_correction_ms: Option<u64>,
    last_engine_action_ms: Option<u64>,
    tracker: DriftTracker,
    echoes: u64,
    applied: u64,
    deferrals: u64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DRIFT_THRESHOLD_SECS, QUIESCENCE_MS)
    }
}

fn log_adapter_error(action: &str, e: &PlayerError) {
    if e.is_transient() {
        debug!("Player not ready for {}: {}", action, e);
    } else {
        warn!("Player {} failed: {}", action, e);
    }
}

impl Reconciler {
    pub fn new(drift_threshold: f64, quiescence_ms: u64) -> Self {
        Self {
            drift_threshold,
            quiescence_ms,
            baseline: None,
            deferred: false,
            last_correction_ms: None,
            last_engine_action_ms: None,
            tracker: DriftTracker::new(),
            echoes: 0,
            applied: 0,
            deferrals: 0,
        }
    }

    pub fn baseline(&self) -> Option<&RoomState> {
        self.baseline.as_ref()
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    fn quiescent(&self, now_ms: u64) -> bool {
        self.last_correction_ms
            .is_some_and(|at| now_ms.saturating_sub(at) < self.quiescence_ms)
    }

    /// Whether the engine itself commanded the player within the
    /// quiescence window. Status changes seen then are its own doing.
    pub fn engine_acted_within(&self, now_ms: u64) -> bool {
        self.last_engine_action_ms
            .is_some_and(|at| now_ms.saturating_sub(at) < self.quiescence_ms)
    }

    /// Record a local seek made outside the engine (user seek)
    pub fn note_seek(&mut self, now_ms: u64) {
        self.last_correction_ms = Some(now_ms);
        self.last_engine_action_ms = Some(now_ms);
    }

    /// Merge one of our own publishes into the baseline before its echo
    /// arrives, so drift checks measure against it
    pub fn assume(&mut self, patch: &RoomPatch) {
        if let Some(baseline) = self.baseline.as_mut() {
            baseline.merge(patch);
        }
    }

    /// Drop assumed writes and fall back to the store's latest state. The
    /// next drift tick re-applies it.
    pub fn rebase(&mut self, state: Option<RoomState>) {
        if let Some(state) = state {
            self.baseline = Some(state);
            self.deferred = true;
        }
    }

    /// Handle a snapshot pushed by the store
    pub async fn on_snapshot(
        &mut self,
        state: RoomState,
        echo: bool,
        in_flight: bool,
        player: &dyn PlayerAdapter,
        now_ms: u64,
    ) -> SnapshotOutcome {
        if echo {
            self.echoes += 1;
            if !self.deferred {
                debug!("Own echo (seq {}), recording baseline", state.update_seq);
                self.baseline = Some(state);
                return SnapshotOutcome::Echo;
            }
        }

        self.baseline = Some(state);

        if in_flight {
            return self.defer(Gate::InFlight);
        }
        if self.quiescent(now_ms) {
            return self.defer(Gate::Quiescent);
        }

        self.deferred = false;
        SnapshotOutcome::Applied(self.apply(player, now_ms).await)
    }

    fn defer(&mut self, gate: Gate) -> SnapshotOutcome {
        debug!("Deferring snapshot ({:?})", gate);
        self.deferred = true;
        self.deferrals += 1;
        SnapshotOutcome::Deferred(gate)
    }

    /// Periodic check. Finishes a deferred apply once its gate opens,
    /// otherwise re-validates the playhead.
    pub async fn on_drift_tick(
        &mut self,
        in_flight: bool,
        player: &dyn PlayerAdapter,
        now_ms: u64,
    ) -> Option<ApplyReport> {
        self.baseline.as_ref()?;

        if self.deferred {
            if in_flight || self.quiescent(now_ms) {
                return None;
            }
            self.deferred = false;
            info!("Applying deferred room state");
            return Some(self.apply(player, now_ms).await);
        }

        Some(self.correct_drift_only(player, now_ms).await)
    }

    /// Apply the baseline right away, ignoring gates (after a local item change)
    pub async fn apply_local(&mut self, player: &dyn PlayerAdapter, now_ms: u64) -> ApplyReport {
        self.apply(player, now_ms).await
    }

    async fn apply(&mut self, player: &dyn PlayerAdapter, now_ms: u64) -> ApplyReport {
        let report = self.apply_steps(player, now_ms).await;
        if report.errors > 0 {
            // Retry the whole apply on the next tick
            self.deferred = true;
        }
        report
    }

    async fn apply_steps(&mut self, player: &dyn PlayerAdapter, now_ms: u64) -> ApplyReport {
        let mut report = ApplyReport::default();
        let Some(state) = self.baseline.clone() else {
            return report;
        };
        self.applied += 1;

        if !state.item_id.is_empty() {
            match player.current_item().await {
                Ok(current) if current.as_deref() == Some(state.item_id.as_str()) => {}
                Ok(_) => match player.load_item(&state.item_id).await {
                    Ok(()) => {
                        info!("Loaded {}", state.item_id);
                        self.last_engine_action_ms = Some(now_ms);
                        report.loaded = Some(state.item_id.clone());
                    }
                    Err(e) => {
                        log_adapter_error("load", &e);
                        report.errors += 1;
                        return report;
                    }
                },
                Err(e) => {
                    log_adapter_error("item query", &e);
                    report.errors += 1;
                    return report;
                }
            }
        }

        let status = match player.status().await {
            Ok(status) => status,
            Err(e) => {
                log_adapter_error("status", &e);
                report.errors += 1;
                return report;
            }
        };

        if status == PlayerStatus::Ended && report.loaded.is_none() {
            debug!("Player at end of {}, leaving transport alone", state.item_id);
            report.skipped_ended = true;
            return report;
        }

        let running = matches!(status, PlayerStatus::Playing | PlayerStatus::Buffering);
        if state.is_playing && !running {
            match player.play().await {
                Ok(()) => {
                    self.last_engine_action_ms = Some(now_ms);
                    report.played = true;
                }
                Err(e) => {
                    log_adapter_error("play", &e);
                    report.errors += 1;
                }
            }
        } else if !state.is_playing && running {
            match player.pause().await {
                Ok(()) => {
                    self.last_engine_action_ms = Some(now_ms);
                    report.paused = true;
                }
                Err(e) => {
                    log_adapter_error("pause", &e);
                    report.errors += 1;
                }
            }
        }

        self.correct_drift(&state, player, now_ms, &mut report).await;
        report
    }

    async fn correct_drift_only(&mut self, player: &dyn PlayerAdapter, now_ms: u64) -> ApplyReport {
        let mut report = ApplyReport::default();
        let Some(state) = self.baseline.clone() else {
            return report;
        };

        match player.status().await {
            Ok(PlayerStatus::Ended) => {
                report.skipped_ended = true;
                return report;
            }
            Ok(_) => {}
            Err(e) => {
                log_adapter_error("status", &e);
                report.errors += 1;
                return report;
            }
        }

        match player.current_item().await {
            Ok(Some(item)) if item == state.item_id => {}
            Ok(_) => {
                // Wrong item loaded; a full apply sorts it out
                return self.apply(player, now_ms).await;
            }
            Err(e) => {
                log_adapter_error("item query", &e);
                report.errors += 1;
                return report;
            }
        }

        self.correct_drift(&state, player, now_ms, &mut report).await;
        report
    }

    async fn correct_drift(
        &mut self,
        state: &RoomState,
        player: &dyn PlayerAdapter,
        now_ms: u64,
        report: &mut ApplyReport,
    ) {
        let actual = match player.current_time().await {
            Ok(actual) => actual,
            Err(e) => {
                log_adapter_error("position read", &e);
                report.errors += 1;
                return;
            }
        };

        let expected = state.expected_position(now_ms);
        let drift = actual - expected;
        report.drift = Some(drift);

        let mut corrected = false;
        if drift.abs() > self.drift_threshold {
            match player.seek(expected).await {
                Ok(()) => {
                    info!("Drift {:+.2}s, seeking to {:.2}s", drift, expected);
                    self.last_correction_ms = Some(now_ms);
                    self.last_engine_action_ms = Some(now_ms);
                    report.seeked_to = Some(expected);
                    corrected = true;
                }
                Err(e) => {
                    log_adapter_error("seek", &e);
                    report.errors += 1;
                }
            }
        }
        self.tracker.add_sample(drift, corrected);
    }

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            last_drift_secs: self.tracker.last_drift(),
            mean_abs_drift_secs: self.tracker.mean_abs_drift(),
            corrections: self.tracker.corrections(),
            echoes_suppressed: self.echoes,
            snapshots_applied: self.applied,
            snapshots_deferred: self.deferrals,
            deferred: self.deferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::player::{MemoryPlayer, PlayerCall};
    use std::sync::Arc;

    const T0: u64 = 1_000_000;

    fn setup() -> (Arc<ManualClock>, MemoryPlayer, Reconciler) {
        let clock = Arc::new(ManualClock::new(T0));
        let player = MemoryPlayer::new(clock.clone());
        (clock, player, Reconciler::default())
    }

    fn room(item: &str, position: f64, is_playing: bool, updated_at: u64) -> RoomState {
        RoomState {
            item_id: item.into(),
            position,
            is_playing,
            updated_at,
            updated_by: "peer".into(),
            update_seq: 1,
            host_id: "peer".into(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_first_apply_loads_plays_and_seeks() {
        let (clock, player, mut engine) = setup();
        let now = clock.now_ms();

        let outcome = engine
            .on_snapshot(room("X", 0.0, true, now - 3_000), false, false, &player, now)
            .await;

        let SnapshotOutcome::Applied(report) = outcome else {
            panic!("expected apply, got {:?}", outcome);
        };
        assert_eq!(report.loaded.as_deref(), Some("X"));
        assert!(report.played);
        assert_eq!(report.seeked_to, Some(3.0));
        assert_eq!(player.position(), 3.0);
        assert!(player.is_playing());
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (clock, player, mut engine) = setup();
        let state = room("X", 10.0, false, clock.now_ms());

        engine
            .on_snapshot(state.clone(), false, false, &player, clock.now_ms())
            .await;
        clock.advance(QUIESCENCE_MS);
        player.clear_calls();

        let outcome = engine
            .on_snapshot(state, false, false, &player, clock.now_ms())
            .await;
        let SnapshotOutcome::Applied(report) = outcome else {
            panic!("expected apply, got {:?}", outcome);
        };
        assert!(!report.acted());
        assert!(player.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drift_converges_in_one_pass() {
        let (clock, player, mut engine) = setup();
        player.load_item("X").await.unwrap();
        player.seek(12.0).await.unwrap();
        player.play().await.unwrap();

        let now = clock.now_ms();
        let outcome = engine
            .on_snapshot(room("X", 10.0, true, now), false, false, &player, now)
            .await;

        let SnapshotOutcome::Applied(report) = outcome else {
            panic!("expected apply, got {:?}", outcome);
        };
        assert!((report.drift.unwrap() - 2.0).abs() < 1e-9);
        let expected = engine.baseline().unwrap().expected_position(clock.now_ms());
        assert!((player.position() - expected).abs() <= DRIFT_THRESHOLD_SECS);
        assert_eq!(engine.sync_status().corrections, 1);
    }

    #[tokio::test]
    async fn test_small_drift_is_left_alone() {
        let (clock, player, mut engine) = setup();
        player.load_item("X").await.unwrap();
        player.seek(10.3).await.unwrap();
        player.clear_calls();

        let now = clock.now_ms();
        engine
            .on_snapshot(room("X", 10.0, false, now), false, false, &player, now)
            .await;
        assert!(player.calls().is_empty());
    }

    #[tokio::test]
    async fn test_own_echo_does_not_reapply() {
        let (clock, player, mut engine) = setup();
        player.load_item("X").await.unwrap();
        player.seek(42.0).await.unwrap();
        // User paused at 42 and published; then resumed locally
        player.play().await.unwrap();
        player.clear_calls();

        let now = clock.now_ms();
        let mut echo = room("X", 42.0, false, now);
        echo.updated_by = "me".into();

        let outcome = engine.on_snapshot(echo, true, false, &player, now).await;
        assert_eq!(outcome, SnapshotOutcome::Echo);
        assert!(player.calls().is_empty());
        assert!(player.is_playing());
        assert_eq!(engine.sync_status().echoes_suppressed, 1);
        assert!(!engine.baseline().unwrap().is_playing);
    }

    #[tokio::test]
    async fn test_in_flight_defers_until_tick() {
        let (clock, player, mut engine) = setup();
        let now = clock.now_ms();

        let outcome = engine
            .on_snapshot(room("X", 5.0, false, now), false, true, &player, now)
            .await;
        assert_eq!(outcome, SnapshotOutcome::Deferred(Gate::InFlight));
        assert!(player.calls().is_empty());

        // Still in flight: nothing yet
        assert!(engine.on_drift_tick(true, &player, now).await.is_none());

        let report = engine.on_drift_tick(false, &player, now).await.unwrap();
        assert_eq!(report.loaded.as_deref(), Some("X"));
        assert_eq!(player.position(), 5.0);
        assert!(!engine.is_deferred());
    }

    #[tokio::test]
    async fn test_echo_after_deferral_is_applied() {
        let (clock, player, mut engine) = setup();
        let now = clock.now_ms();

        engine
            .on_snapshot(room("X", 5.0, false, now), false, true, &player, now)
            .await;

        let mut echo = room("X", 8.0, false, now);
        echo.updated_by = "me".into();
        let outcome = engine.on_snapshot(echo, true, false, &player, now).await;

        assert!(matches!(outcome, SnapshotOutcome::Applied(_)));
        assert_eq!(player.position(), 8.0);
    }

    #[tokio::test]
    async fn test_rate_limit_after_seek() {
        let (clock, player, mut engine) = setup();
        player.load_item("X").await.unwrap();
        let now = clock.now_ms();

        engine
            .on_snapshot(room("X", 30.0, false, now), false, false, &player, now)
            .await;
        assert_eq!(player.position(), 30.0);

        clock.advance(100);
        let outcome = engine
            .on_snapshot(room("X", 60.0, false, now), false, false, &player, clock.now_ms())
            .await;
        assert_eq!(outcome, SnapshotOutcome::Deferred(Gate::Quiescent));
        assert_eq!(player.position(), 30.0);

        clock.advance(QUIESCENCE_MS);
        engine.on_drift_tick(false, &player, clock.now_ms()).await;
        assert_eq!(player.position(), 60.0);
    }

    #[tokio::test]
    async fn test_ended_player_is_left_alone() {
        let (clock, player, mut engine) = setup();
        player.load_item("X").await.unwrap();
        player.finish();
        player.clear_calls();

        let now = clock.now_ms();
        let outcome = engine
            .on_snapshot(room("X", 0.0, true, now - 400_000), false, false, &player, now)
            .await;
        let SnapshotOutcome::Applied(report) = outcome else {
            panic!("expected apply, got {:?}", outcome);
        };
        assert!(report.skipped_ended);
        assert!(player.calls().is_empty());

        let report = engine.on_drift_tick(false, &player, now).await.unwrap();
        assert!(report.skipped_ended);
    }

    #[tokio::test]
    async fn test_not_ready_is_swallowed_and_retried() {
        let (clock, player, mut engine) = setup();
        player.load_item("X").await.unwrap();
        player.set_ready(false);

        let now = clock.now_ms();
        let outcome = engine
            .on_snapshot(room("X", 20.0, true, now), false, false, &player, now)
            .await;
        let SnapshotOutcome::Applied(report) = outcome else {
            panic!("expected apply, got {:?}", outcome);
        };
        assert!(report.errors > 0);
        assert!(!player.is_playing());

        assert!(engine.is_deferred());

        player.set_ready(true);
        let report = engine.on_drift_tick(false, &player, now).await.unwrap();
        assert!(report.played);
        assert_eq!(report.seeked_to, Some(20.0));
    }

    #[tokio::test]
    async fn test_assume_moves_baseline() {
        let (clock, player, mut engine) = setup();
        let now = clock.now_ms();
        engine
            .on_snapshot(room("X", 0.0, false, now), false, false, &player, now)
            .await;

        engine.assume(&RoomPatch::new().position(90.0));
        player.seek(90.0).await.unwrap();
        clock.advance(2_000);

        let report = engine
            .on_drift_tick(false, &player, clock.now_ms())
            .await
            .unwrap();
        assert!(report.seeked_to.is_none());
        assert!(player.calls().iter().all(|c| *c != PlayerCall::Seek(0.0)));
    }
}
