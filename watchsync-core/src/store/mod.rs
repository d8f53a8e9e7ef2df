//! Shared State Store
//!
//! The eventually-consistent key-value store every client in a room reads
//! and writes. One RoomState record and one queue per room.

mod log;
mod memory;
mod rest;

pub use log::{Effect, LogRecord, RoomView, WriteLog, WriteOp};
pub use memory::MemoryStore;
pub use rest::{RestStore, DEFAULT_POLL_INTERVAL};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::sync::{QueueEntry, QueueEntryRecord, RoomPatch, RoomState};

/// Latest committed RoomState (`None` while the room does not exist)
pub type RoomWatch = watch::Receiver<Option<RoomState>>;

/// Latest committed queue, in FIFO order
pub type QueueWatch = watch::Receiver<Vec<QueueEntry>>;

/// Errors from the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned status {0}")]
    Status(u16),

    #[error("Failed to decode store record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Store unavailable")]
    Unavailable,

    #[error("Store is shutting down")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the sync protocol needs from a shared store.
///
/// Writes are atomic per key. Subscriptions deliver the latest committed
/// value right away and after every commit; dropping the receiver
/// unsubscribes.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Replace the room record
    async fn set_room(&self, room_id: &str, state: &RoomState) -> StoreResult<()>;

    /// Merge fields into the room record; absent fields are untouched
    async fn update_room(&self, room_id: &str, patch: &RoomPatch) -> StoreResult<()>;

    /// Read the room record once
    async fn fetch_room(&self, room_id: &str) -> StoreResult<Option<RoomState>>;

    /// Watch the room record
    async fn subscribe_room(&self, room_id: &str) -> StoreResult<RoomWatch>;

    /// Append a queue entry; returns the generated key
    async fn push_queue(&self, room_id: &str, entry: &QueueEntryRecord) -> StoreResult<String>;

    /// Remove a queue entry if it is still present.
    ///
    /// Returns `true` only for the caller whose call deleted it.
    async fn remove_queue(&self, room_id: &str, entry_id: &str) -> StoreResult<bool>;

    /// Remove every queue entry
    async fn clear_queue(&self, room_id: &str) -> StoreResult<()>;

    /// Read the queue once, in FIFO order
    async fn fetch_queue(&self, room_id: &str) -> StoreResult<Vec<QueueEntry>>;

    /// Watch the queue
    async fn subscribe_queue(&self, room_id: &str) -> StoreResult<QueueWatch>;
}
