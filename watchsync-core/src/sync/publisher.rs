//! Intent Publisher
//!
//! Turns local decisions into stamped merge-writes and remembers which of
//! them are still on their way through the store.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use super::protocol::Intent;
use super::state::{RoomPatch, RoomState};
use crate::player::PlayerStatus;

/// How long the in-flight window stays open after a write completes
pub const ECHO_RELEASE_DELAY: Duration = Duration::from_millis(100);

/// A write ready to hand to the store
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWrite {
    pub seq: u64,
    pub label: &'static str,
    pub patch: RoomPatch,
}

/// Stamps and tracks this client's writes
#[derive(Debug)]
pub struct IntentPublisher {
    client_id: String,
    last_issued: u64,
    pending: BTreeSet<u64>,
    release_at: Option<Instant>,
    release_delay: Duration,
}

impl IntentPublisher {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_release_delay(client_id, ECHO_RELEASE_DELAY)
    }

    pub fn with_release_delay(client_id: impl Into<String>, release_delay: Duration) -> Self {
        Self {
            client_id: client_id.into(),
            last_issued: 0,
            pending: BTreeSet::new(),
            release_at: None,
            release_delay,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sequence number of the newest write issued so far
    pub fn last_issued(&self) -> u64 {
        self.last_issued
    }

    /// Stamp an intent with time, origin and the next sequence number
    pub fn prepare(&mut self, intent: Intent, now_ms: u64) -> PreparedWrite {
        self.last_issued += 1;
        let seq = self.last_issued;
        self.pending.insert(seq);

        let label = intent.label();
        let patch = intent
            .into_patch()
            .stamped(now_ms, self.client_id.clone(), seq);
        PreparedWrite { seq, label, patch }
    }

    /// Mark a write finished (either way). Returns when the in-flight
    /// window will close if nothing else is issued.
    pub fn complete(&mut self, seq: u64, now: Instant) -> Instant {
        self.pending.remove(&seq);
        let release = now + self.release_delay;
        let release = match self.release_at {
            Some(existing) if existing > release => existing,
            _ => release,
        };
        self.release_at = Some(release);
        release
    }

    /// Whether any write is pending or only just completed
    pub fn in_flight(&self, now: Instant) -> bool {
        !self.pending.is_empty() || self.release_at.is_some_and(|at| now < at)
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Whether a snapshot was produced by one of our own writes
    pub fn is_echo(&self, state: &RoomState) -> bool {
        state.updated_by == self.client_id
            && state.update_seq != 0
            && state.update_seq <= self.last_issued
    }
}

/// Intent to publish for a local status transition.
///
/// Transitions that only confirm the room's transport (for instance the
/// engine itself just resumed playback) publish nothing.
pub fn intent_for_status(
    status: PlayerStatus,
    position: f64,
    room: Option<&RoomState>,
) -> Option<Intent> {
    let room = room?;
    match status {
        PlayerStatus::Playing if !room.is_playing => Some(Intent::Play { position }),
        PlayerStatus::Paused if room.is_playing => Some(Intent::Pause { position }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_stamps_origin() {
        let mut publisher = IntentPublisher::new("me");
        let write = publisher.prepare(Intent::Pause { position: 42.0 }, 9_000);

        assert_eq!(write.seq, 1);
        assert_eq!(write.label, "pause");
        assert_eq!(write.patch.updated_at, Some(9_000));
        assert_eq!(write.patch.updated_by.as_deref(), Some("me"));
        assert_eq!(write.patch.update_seq, Some(1));
        assert_eq!(write.patch.position, Some(42.0));
        // Merge-write: the item is untouched
        assert!(write.patch.item_id.is_none());

        let next = publisher.prepare(Intent::Play { position: 42.0 }, 9_100);
        assert_eq!(next.seq, 2);
        assert_eq!(publisher.last_issued(), 2);
    }

    #[test]
    fn test_echo_detection() {
        let mut publisher = IntentPublisher::new("me");
        let mut state = RoomState::new("A", "host", 0);
        state.updated_by = "me".into();
        state.update_seq = 1;

        // Nothing issued yet: a leftover record from an old session
        assert!(!publisher.is_echo(&state));

        publisher.prepare(Intent::Pause { position: 1.0 }, 0);
        assert!(publisher.is_echo(&state));

        state.updated_by = "other".into();
        assert!(!publisher.is_echo(&state));

        state.updated_by = "me".into();
        state.update_seq = 0;
        assert!(!publisher.is_echo(&state));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_window() {
        let mut publisher = IntentPublisher::new("me");
        let start = Instant::now();
        assert!(!publisher.in_flight(start));

        let write = publisher.prepare(Intent::Play { position: 0.0 }, 0);
        assert!(publisher.in_flight(start));
        assert_eq!(publisher.pending_writes(), 1);

        let release = publisher.complete(write.seq, start);
        assert_eq!(release, start + ECHO_RELEASE_DELAY);
        assert!(publisher.in_flight(start + Duration::from_millis(50)));
        assert!(!publisher.in_flight(release));
    }

    #[test]
    fn test_status_intents() {
        let mut room = RoomState::new("A", "host", 0);

        assert_eq!(
            intent_for_status(PlayerStatus::Playing, 5.0, Some(&room)),
            Some(Intent::Play { position: 5.0 })
        );
        assert_eq!(intent_for_status(PlayerStatus::Paused, 5.0, Some(&room)), None);

        room.is_playing = true;
        assert_eq!(intent_for_status(PlayerStatus::Playing, 5.0, Some(&room)), None);
        assert_eq!(
            intent_for_status(PlayerStatus::Paused, 7.0, Some(&room)),
            Some(Intent::Pause { position: 7.0 })
        );
        assert_eq!(intent_for_status(PlayerStatus::Ended, 7.0, Some(&room)), None);
        assert_eq!(intent_for_status(PlayerStatus::Playing, 7.0, None), None);
    }
}
