//! Room State Records
//!
//! The shared "now playing" record, the partial writes merged into it, and
//! the queue entries that wait to become it.

use serde::{Deserialize, Serialize};

use crate::drift;

/// The room's shared "now playing" record.
///
/// One per room, jointly owned by every client. `position` is only valid
/// as of `updated_at`, so readers project it with [`RoomState::expected_position`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomState {
    /// Opaque media identifier
    pub item_id: String,
    /// Playhead in seconds, valid as of `updated_at`
    pub position: f64,
    pub is_playing: bool,
    /// Publisher's wall clock, epoch milliseconds
    pub updated_at: u64,
    /// Client id of the last writer
    pub updated_by: String,
    /// Last writer's local write sequence (0 = untagged)
    pub update_seq: u64,
    pub host_id: String,
    /// Set once at room creation
    pub created_at: u64,
}

impl RoomState {
    /// Initial record for a freshly created room (paused at 0)
    pub fn new(item_id: impl Into<String>, host_id: impl Into<String>, now_ms: u64) -> Self {
        let host_id = host_id.into();
        Self {
            item_id: item_id.into(),
            position: 0.0,
            is_playing: false,
            updated_at: now_ms,
            updated_by: host_id.clone(),
            update_seq: 0,
            host_id,
            created_at: now_ms,
        }
    }

    /// Where the playhead should be at `now_ms`
    pub fn expected_position(&self, now_ms: u64) -> f64 {
        drift::expected_position(self.position, self.is_playing, self.updated_at, now_ms)
    }

    /// Apply a merge-write: only fields present in the patch change
    pub fn merge(&mut self, patch: &RoomPatch) {
        if let Some(item_id) = &patch.item_id {
            self.item_id = item_id.clone();
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(is_playing) = patch.is_playing {
            self.is_playing = is_playing;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
        if let Some(updated_by) = &patch.updated_by {
            self.updated_by = updated_by.clone();
        }
        if let Some(update_seq) = patch.update_seq {
            self.update_seq = update_seq;
        }
        if let Some(host_id) = &patch.host_id {
            self.host_id = host_id.clone();
        }
    }

    /// Copy of this state with a patch merged in
    pub fn merged(&self, patch: &RoomPatch) -> Self {
        let mut next = self.clone();
        next.merge(patch);
        next
    }
}

/// A partial RoomState write. Absent fields keep their stored values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
}

impl RoomPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn position(mut self, position: f64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn playing(mut self, is_playing: bool) -> Self {
        self.is_playing = Some(is_playing);
        self
    }

    /// Stamp the write with its origin and time
    pub fn stamped(mut self, updated_at: u64, updated_by: impl Into<String>, update_seq: u64) -> Self {
        self.updated_at = Some(updated_at);
        self.updated_by = Some(updated_by.into());
        self.update_seq = Some(update_seq);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A queue entry as stored under its generated key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryRecord {
    pub item_id: String,
    #[serde(default)]
    pub added_at: u64,
    #[serde(default)]
    pub added_by: String,
}

impl QueueEntryRecord {
    pub fn new(item_id: impl Into<String>, added_by: impl Into<String>, added_at: u64) -> Self {
        Self {
            item_id: item_id.into(),
            added_at,
            added_by: added_by.into(),
        }
    }
}

/// A queue entry with its store key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Store-generated key; the unit of removal
    pub id: String,
    pub item_id: String,
    pub added_at: u64,
    pub added_by: String,
}

impl QueueEntry {
    pub fn from_record(id: impl Into<String>, record: QueueEntryRecord) -> Self {
        Self {
            id: id.into(),
            item_id: record.item_id,
            added_at: record.added_at,
            added_by: record.added_by,
        }
    }

    pub fn record(&self) -> QueueEntryRecord {
        QueueEntryRecord {
            item_id: self.item_id.clone(),
            added_at: self.added_at,
            added_by: self.added_by.clone(),
        }
    }
}

/// Sort entries into FIFO order.
///
/// Store keys are commit-ordered, so they decide. `added_at` comes from the
/// writer's unsynchronized clock and is only kept for display.
pub fn sort_fifo(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| a.id.cmp(&b.id));
}

/// The entry to play next, if any
pub fn queue_head(entries: &[QueueEntry]) -> Option<&QueueEntry> {
    entries.iter().min_by(|a, b| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, item: &str, added_at: u64) -> QueueEntry {
        QueueEntry::from_record(id, QueueEntryRecord::new(item, "someone", added_at))
    }

    #[test]
    fn test_wire_layout_is_camel_case() {
        let state = RoomState::new("abc", "host-1", 1_000);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["itemId"], "abc");
        assert_eq!(json["isPlaying"], false);
        assert_eq!(json["updatedAt"], 1_000);
        assert_eq!(json["updatedBy"], "host-1");
        assert_eq!(json["hostId"], "host-1");
        assert_eq!(json["createdAt"], 1_000);
    }

    #[test]
    fn test_missing_update_seq_defaults_to_zero() {
        let json = r#"{"itemId":"x","position":12.5,"isPlaying":true,"updatedAt":5,"updatedBy":"c"}"#;
        let state: RoomState = serde_json::from_str(json).unwrap();
        assert_eq!(state.update_seq, 0);
        assert_eq!(state.position, 12.5);
        assert!(state.host_id.is_empty());
    }

    #[test]
    fn test_merge_preserves_untouched_fields() {
        let mut state = RoomState::new("abc", "host-1", 1_000);
        state.position = 30.0;

        state.merge(&RoomPatch::new().playing(true));

        assert!(state.is_playing);
        assert_eq!(state.item_id, "abc");
        assert_eq!(state.position, 30.0);
        assert_eq!(state.created_at, 1_000);
        assert_eq!(state.host_id, "host-1");
    }

    #[test]
    fn test_patch_omits_absent_fields() {
        let patch = RoomPatch::new().position(3.0).stamped(9, "me", 4);
        let json = serde_json::to_value(&patch).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert_eq!(json["updateSeq"], 4);
        assert!(!obj.contains_key("itemId"));
        assert!(!obj.contains_key("isPlaying"));
    }

    #[test]
    fn test_expected_position() {
        let mut state = RoomState::new("abc", "h", 10_000);
        assert_eq!(state.expected_position(13_000), 0.0);
        state.is_playing = true;
        assert_eq!(state.expected_position(13_000), 3.0);
    }

    #[test]
    fn test_queue_head_is_first_committed() {
        let mut entries = vec![entry("k3", "C", 30), entry("k1", "A", 10), entry("k2", "B", 10)];
        assert_eq!(queue_head(&entries).unwrap().item_id, "A");

        sort_fifo(&mut entries);
        let order: Vec<_> = entries.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);

        assert!(queue_head(&[]).is_none());
    }

    #[test]
    fn test_fifo_ignores_writer_clocks() {
        // A's writer runs ahead of B's, but A committed first
        let mut entries = vec![entry("k2", "B", 2_000), entry("k1", "A", 10_000)];
        assert_eq!(queue_head(&entries).unwrap().item_id, "A");

        sort_fifo(&mut entries);
        let order: Vec<_> = entries.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }
}
