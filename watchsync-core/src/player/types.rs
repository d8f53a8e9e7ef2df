//! Types for the local player HTTP API

use serde::{Deserialize, Serialize};

/// Response wrapper for most player API endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub data: T,
}

/// Currently loaded item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    #[serde(default)]
    pub play_params: Option<PlayParams>,

    #[serde(default)]
    pub name: String,

    /// Total duration in milliseconds
    #[serde(default)]
    pub duration_in_millis: u64,

    /// Current playback position in seconds
    #[serde(default)]
    pub current_playback_time: f64,

    /// Remaining time in seconds
    #[serde(default)]
    pub remaining_time: f64,
}

impl NowPlaying {
    /// Get the item ID from play params
    pub fn item_id(&self) -> Option<&str> {
        self.play_params.as_ref().map(|p| p.id.as_str())
    }
}

/// Play parameters for an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayParams {
    pub id: String,
    #[serde(default)]
    pub kind: String,
}

/// Response for is-playing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct IsPlayingResponse {
    pub is_playing: bool,
}

/// Response for now-playing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct NowPlayingResponse {
    pub info: NowPlaying,
}

/// Request body for play-item endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PlayItemRequest {
    #[serde(rename = "type")]
    pub item_type: String,
    pub id: String,
}

/// Request body for seek endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SeekRequest {
    pub position: f64,
}
