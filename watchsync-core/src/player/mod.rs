//! Local Player Adapters
//!
//! Thin control surface over whatever actually renders the media: a local
//! player's HTTP API, an in-process simulation, or a native player across FFI.

mod http;
mod memory;
mod types;

pub use http::{HttpPlayer, DEFAULT_ITEM_TYPE, DEFAULT_PORT};
pub use memory::{MemoryPlayer, PlayerCall, DEFAULT_DURATION_SECS};
pub use types::*;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a player adapter can report
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Player is not running or not reachable")]
    NotReachable,

    #[error("Invalid API token")]
    Unauthorized,

    #[error("Player is not ready")]
    NotReady,

    #[error("API error: {0}")]
    Api(String),
}

impl PlayerError {
    /// Errors that clear up on their own (loading, restarting)
    pub fn is_transient(&self) -> bool {
        matches!(self, PlayerError::NotReady | PlayerError::NotReachable)
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;

/// Playback status reported by a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Unstarted,
    Playing,
    Paused,
    Buffering,
    Ended,
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerStatus::Unstarted => "unstarted",
            PlayerStatus::Playing => "playing",
            PlayerStatus::Paused => "paused",
            PlayerStatus::Buffering => "buffering",
            PlayerStatus::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Control surface the sync engine drives
#[async_trait]
pub trait PlayerAdapter: Send + Sync {
    /// Load an item (cued at 0, not necessarily playing)
    async fn load_item(&self, item_id: &str) -> PlayerResult<()>;

    async fn play(&self) -> PlayerResult<()>;

    async fn pause(&self) -> PlayerResult<()>;

    /// Move the playhead to `position` seconds
    async fn seek(&self, position: f64) -> PlayerResult<()>;

    /// Playhead in seconds
    async fn current_time(&self) -> PlayerResult<f64>;

    async fn status(&self) -> PlayerResult<PlayerStatus>;

    /// Item currently loaded, if any
    async fn current_item(&self) -> PlayerResult<Option<String>>;
}
