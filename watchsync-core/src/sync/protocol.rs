//! Playback Intents
//!
//! What a client asks the room to become. Each intent maps to one
//! merge-write of [`RoomPatch`] fields.

use serde::{Deserialize, Serialize};

use super::state::{RoomPatch, RoomState};

/// A local decision to change the room's playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    /// Local player started playing at `position`
    Play { position: f64 },
    /// Local player paused at `position`
    Pause { position: f64 },
    /// User moved the playhead
    Seek { position: f64, is_playing: bool },
    /// User picked a different item
    ChangeItem { item_id: String, autoplay: bool },
    /// Queue head promoted after the current item ended
    Advance { item_id: String },
}

impl Intent {
    /// The fields this intent writes (without origin stamps)
    pub fn into_patch(self) -> RoomPatch {
        match self {
            Intent::Play { position } => RoomPatch::new().playing(true).position(position),
            Intent::Pause { position } => RoomPatch::new().playing(false).position(position),
            Intent::Seek {
                position,
                is_playing,
            } => RoomPatch::new().position(position).playing(is_playing),
            Intent::ChangeItem { item_id, autoplay } => {
                RoomPatch::new().item(item_id).position(0.0).playing(autoplay)
            }
            Intent::Advance { item_id } => RoomPatch::new().item(item_id).position(0.0).playing(true),
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Intent::Play { .. } => "play",
            Intent::Pause { .. } => "pause",
            Intent::Seek { .. } => "seek",
            Intent::ChangeItem { .. } => "change_item",
            Intent::Advance { .. } => "advance",
        }
    }
}

/// Origin of a RoomState write: who wrote it and which of their writes it was
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CausalTag {
    pub client_id: String,
    pub seq: u64,
}

impl CausalTag {
    /// Tag carried by a snapshot; `None` for untagged writes (seq 0)
    pub fn of(state: &RoomState) -> Option<Self> {
        if state.update_seq == 0 || state.updated_by.is_empty() {
            return None;
        }
        Some(Self {
            client_id: state.updated_by.clone(),
            seq: state.update_seq,
        })
    }
}
