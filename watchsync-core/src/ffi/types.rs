//! FFI types exposed via uniffi

use crate::player::PlayerStatus;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::sync::{QueueEntry, RoomState, SyncStatus as InternalSyncStatus};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Player error: {0}")]
    PlayerError(String),

    #[error("No player configured")]
    NoPlayer,

    #[error("Invalid room code")]
    InvalidRoomCode,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(f64),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Store(StoreError::RoomNotFound(room)) | SessionError::RoomNotFound(room) => {
                CoreError::RoomNotFound(room)
            }
            SessionError::Store(e) => CoreError::StoreError(e.to_string()),
            SessionError::Player(e) => CoreError::PlayerError(e.to_string()),
            SessionError::InvalidPosition(position) => CoreError::InvalidPosition(position),
            SessionError::Promotion(reason) => CoreError::StoreError(reason),
            SessionError::Closed => CoreError::NotInRoom,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::from(SessionError::Store(e))
    }
}

/// Player status exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PlaybackStatus {
    Unstarted,
    Playing,
    Paused,
    Buffering,
    Ended,
}

impl From<PlayerStatus> for PlaybackStatus {
    fn from(s: PlayerStatus) -> Self {
        match s {
            PlayerStatus::Unstarted => PlaybackStatus::Unstarted,
            PlayerStatus::Playing => PlaybackStatus::Playing,
            PlayerStatus::Paused => PlaybackStatus::Paused,
            PlayerStatus::Buffering => PlaybackStatus::Buffering,
            PlayerStatus::Ended => PlaybackStatus::Ended,
        }
    }
}

impl From<PlaybackStatus> for PlayerStatus {
    fn from(s: PlaybackStatus) -> Self {
        match s {
            PlaybackStatus::Unstarted => PlayerStatus::Unstarted,
            PlaybackStatus::Playing => PlayerStatus::Playing,
            PlaybackStatus::Paused => PlayerStatus::Paused,
            PlaybackStatus::Buffering => PlayerStatus::Buffering,
            PlaybackStatus::Ended => PlayerStatus::Ended,
        }
    }
}

/// Room state exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct RoomSnapshot {
    pub room_code: String,
    pub item_id: String,
    /// Playhead in seconds as of `updated_at_ms`
    pub position: f64,
    pub is_playing: bool,
    pub updated_at_ms: u64,
    pub updated_by: String,
    pub host_id: String,
    pub created_at_ms: u64,
    /// Where the playhead should be now
    pub expected_position: f64,
}

impl RoomSnapshot {
    pub fn from_state(room_code: &str, state: &RoomState, now_ms: u64) -> Self {
        Self {
            room_code: room_code.to_string(),
            item_id: state.item_id.clone(),
            position: state.position,
            is_playing: state.is_playing,
            updated_at_ms: state.updated_at,
            updated_by: state.updated_by.clone(),
            host_id: state.host_id.clone(),
            created_at_ms: state.created_at,
            expected_position: state.expected_position(now_ms),
        }
    }
}

/// Queue entry exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct QueueItem {
    pub id: String,
    pub item_id: String,
    pub added_at_ms: u64,
    pub added_by: String,
}

impl From<&QueueEntry> for QueueItem {
    fn from(e: &QueueEntry) -> Self {
        Self {
            id: e.id.clone(),
            item_id: e.item_id.clone(),
            added_at_ms: e.added_at,
            added_by: e.added_by.clone(),
        }
    }
}

/// Sync status for debug display
#[derive(Debug, Clone, uniffi::Record)]
pub struct SyncStatus {
    /// Latest drift in milliseconds (positive = ahead of the room)
    pub drift_ms: Option<i64>,
    /// Mean absolute drift over recent samples
    pub mean_abs_drift_ms: u64,
    /// Seeks performed to correct drift
    pub corrections: u64,
    pub echoes_suppressed: u64,
    pub snapshots_applied: u64,
    pub snapshots_deferred: u64,
    /// Whether a room update is waiting to be applied
    pub pending_apply: bool,
}

impl From<&InternalSyncStatus> for SyncStatus {
    fn from(s: &InternalSyncStatus) -> Self {
        Self {
            drift_ms: s.last_drift_secs.map(|d| (d * 1000.0).round() as i64),
            mean_abs_drift_ms: (s.mean_abs_drift_secs * 1000.0).round() as u64,
            corrections: s.corrections,
            echoes_suppressed: s.echoes_suppressed,
            snapshots_applied: s.snapshots_applied,
            snapshots_deferred: s.snapshots_deferred,
            pending_apply: s.deferred,
        }
    }
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_connected(&self, room_code: String, client_id: String);
    fn on_room_state_changed(&self, state: RoomSnapshot);
    fn on_queue_changed(&self, queue: Vec<QueueItem>);
    /// Local playhead sample (about twice a second)
    fn on_position(&self, position: Option<f64>, status: PlaybackStatus);
    /// Called after every drift check
    fn on_sync_status(&self, status: SyncStatus);
    fn on_error(&self, message: String);
    fn on_disconnected(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_conversion() {
        let status = InternalSyncStatus {
            last_drift_secs: Some(-0.25),
            mean_abs_drift_secs: 0.1234,
            corrections: 2,
            echoes_suppressed: 5,
            snapshots_applied: 9,
            snapshots_deferred: 1,
            deferred: true,
        };
        let ffi = SyncStatus::from(&status);
        assert_eq!(ffi.drift_ms, Some(-250));
        assert_eq!(ffi.mean_abs_drift_ms, 123);
        assert!(ffi.pending_apply);
    }

    #[test]
    fn test_room_snapshot_projects_position() {
        let mut state = RoomState::new("X", "h", 10_000);
        state.is_playing = true;
        let snapshot = RoomSnapshot::from_state("ABCDEFGH", &state, 12_000);
        assert_eq!(snapshot.expected_position, 2.0);
        assert_eq!(snapshot.position, 0.0);
    }

    #[test]
    fn test_error_mapping() {
        let e = CoreError::from(SessionError::RoomNotFound("R".into()));
        assert!(matches!(e, CoreError::RoomNotFound(r) if r == "R"));
        let e = CoreError::from(SessionError::InvalidPosition(f64::INFINITY));
        assert!(matches!(e, CoreError::InvalidPosition(p) if p.is_infinite()));
        let e = CoreError::from(StoreError::Unavailable);
        assert!(matches!(e, CoreError::StoreError(_)));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PlayerStatus::Unstarted,
            PlayerStatus::Playing,
            PlayerStatus::Paused,
            PlayerStatus::Buffering,
            PlayerStatus::Ended,
        ] {
            assert_eq!(PlayerStatus::from(PlaybackStatus::from(status)), status);
        }
    }
}
