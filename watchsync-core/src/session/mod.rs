//! Sync Session
//!
//! One client's membership in a room: a single actor task that owns the
//! reconciliation engine, the intent publisher and the queue controller,
//! and multiplexes store pushes, user commands and its timers.

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::SharedClock;
use crate::drift::DRIFT_THRESHOLD_SECS;
use crate::player::{PlayerAdapter, PlayerError, PlayerStatus};
use crate::room_code::new_client_id;
use crate::store::{SharedStore, StoreError};
use crate::sync::{QueueEntry, RoomState, SyncStatus, ECHO_RELEASE_DELAY, QUIESCENCE_MS};

/// Interval between drift checks
pub const DRIFT_CHECK_INTERVAL: Duration = Duration::from_millis(2000);

/// Interval between terminal-playback polls
pub const END_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Interval between local position samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Errors surfaced by a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(f64),

    #[error("Queue promotion failed: {0}")]
    Promotion(String),

    #[error("Session is closed")]
    Closed,
}

/// Session tuning. `Default` uses the protocol's contract constants.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_id: String,
    pub client_id: String,
    pub drift_threshold: f64,
    pub drift_check_interval: Duration,
    pub quiescence: Duration,
    pub echo_release_delay: Duration,
    pub end_poll_interval: Duration,
    pub sample_interval: Duration,
    /// Derive status events from samples (for players without push events)
    pub poll_player_status: bool,
}

impl SessionConfig {
    /// Config for a room with a fresh client id
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            client_id: new_client_id(),
            drift_threshold: DRIFT_THRESHOLD_SECS,
            drift_check_interval: DRIFT_CHECK_INTERVAL,
            quiescence: Duration::from_millis(QUIESCENCE_MS),
            echo_release_delay: ECHO_RELEASE_DELAY,
            end_poll_interval: END_POLL_INTERVAL,
            sample_interval: SAMPLE_INTERVAL,
            poll_player_status: true,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

/// Receives session events. Every method defaults to doing nothing.
pub trait SessionObserver: Send + Sync {
    fn on_connected(&self, _room_id: &str, _client_id: &str) {}

    /// A RoomState snapshot arrived from the store
    fn on_room_state(&self, _state: &RoomState) {}

    fn on_queue(&self, _entries: &[QueueEntry]) {}

    /// Local playhead sample
    fn on_position(&self, _position: Option<f64>, _status: PlayerStatus) {}

    fn on_sync_status(&self, _status: &SyncStatus) {}

    /// This client promoted a queue entry
    fn on_promoted(&self, _entry: &QueueEntry) {}

    fn on_error(&self, _error: &SessionError) {}

    fn on_disconnected(&self) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// Requests from the session's owner to its actor
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Seek(f64),
    LoadItem { item_id: String, autoplay: bool },
    Enqueue(String),
    RemoveEntry(String),
    ClearQueue,
    PlayNext,
    PlayerStatusChanged(PlayerStatus),
}

/// What the actor last knew, readable from outside
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub room: Option<RoomState>,
    pub queue: Vec<QueueEntry>,
    pub sync: SyncStatus,
}

/// Owner's handle to a running session. Dropping it stops the session.
pub struct SessionHandle {
    room_id: String,
    client_id: String,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    view: Arc<RwLock<SessionView>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    pub fn play(&self) -> Result<(), SessionError> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.send(Command::Pause)
    }

    /// Seek the room. Negative positions clamp to 0; NaN and infinities are rejected.
    pub fn seek(&self, position: f64) -> Result<(), SessionError> {
        if !position.is_finite() {
            return Err(SessionError::InvalidPosition(position));
        }
        self.send(Command::Seek(position.max(0.0)))
    }

    pub fn load_item(&self, item_id: impl Into<String>, autoplay: bool) -> Result<(), SessionError> {
        self.send(Command::LoadItem {
            item_id: item_id.into(),
            autoplay,
        })
    }

    pub fn enqueue(&self, item_id: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::Enqueue(item_id.into()))
    }

    pub fn remove_entry(&self, entry_id: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::RemoveEntry(entry_id.into()))
    }

    pub fn clear_queue(&self) -> Result<(), SessionError> {
        self.send(Command::ClearQueue)
    }

    /// Skip to the head of the queue now
    pub fn play_next(&self) -> Result<(), SessionError> {
        self.send(Command::PlayNext)
    }

    /// Report a status change pushed by the player
    pub fn player_status_changed(&self, status: PlayerStatus) -> Result<(), SessionError> {
        self.send(Command::PlayerStatusChanged(status))
    }

    /// Last RoomState the session knows (including its own pending writes)
    pub fn room_state(&self) -> Option<RoomState> {
        self.view.read().room.clone()
    }

    pub fn queue(&self) -> Vec<QueueEntry> {
        self.view.read().queue.clone()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.view.read().sync.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the session and wait for its actor to finish
    pub async fn leave(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Write the initial RoomState of a new room (paused at 0)
pub async fn create_room(
    store: &dyn SharedStore,
    room_id: &str,
    item_id: &str,
    host_id: &str,
    clock: &SharedClock,
) -> Result<RoomState, SessionError> {
    let state = RoomState::new(item_id, host_id, clock.now_ms());
    store.set_room(room_id, &state).await?;
    info!("Created room {} with {}", room_id, item_id);
    Ok(state)
}

/// Join an existing room and start syncing the player to it
pub async fn start(
    config: SessionConfig,
    store: Arc<dyn SharedStore>,
    player: Arc<dyn PlayerAdapter>,
    clock: SharedClock,
    observer: Arc<dyn SessionObserver>,
) -> Result<SessionHandle, SessionError> {
    let room_rx = store.subscribe_room(&config.room_id).await?;
    if room_rx.borrow().is_none() {
        return Err(SessionError::RoomNotFound(config.room_id.clone()));
    }
    let queue_rx = store.subscribe_queue(&config.room_id).await?;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let view = Arc::new(RwLock::new(SessionView::default()));

    info!(
        "Joining room {} as {}",
        config.room_id, config.client_id
    );
    observer.on_connected(&config.room_id, &config.client_id);

    let room_id = config.room_id.clone();
    let client_id = config.client_id.clone();
    let actor = handlers::Actor::new(
        config,
        store,
        player,
        clock,
        observer,
        room_rx,
        queue_rx,
        command_rx,
        cancel.clone(),
        view.clone(),
    );
    let task = tokio::spawn(actor.run());

    Ok(SessionHandle {
        room_id,
        client_id,
        commands: command_tx,
        cancel,
        view,
        task: Some(task),
    })
}
