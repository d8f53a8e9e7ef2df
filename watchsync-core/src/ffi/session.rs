//! Session implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::player::{HttpPlayer, PlayerAdapter, PlayerError, PlayerStatus};
use crate::room_code::{new_client_id, RoomCode};
use crate::session::{self, SessionConfig, SessionError, SessionHandle, SessionObserver};
use crate::store::{RestStore, SharedStore};
use crate::sync::{QueueEntry, RoomState, SyncStatus as InternalSyncStatus};

use super::player::{ForeignPlayer, NativePlayer};
use super::types::*;

static TRACING_INIT: Once = Once::new();

const DEFAULT_LOG_FILTER: &str = "watchsync_core=debug,hyper_util=off,reqwest=off,hyper=off";

type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

/// Main session interface
#[derive(uniffi::Object)]
pub struct Session {
    runtime: Runtime,
    store: Arc<dyn SharedStore>,
    clock: SharedClock,
    player: RwLock<Option<Arc<dyn PlayerAdapter>>>,
    /// Whether the player pushes status changes via `notify_player_status`
    player_pushes_status: RwLock<bool>,
    callback: SharedCallback,
    handle: RwLock<Option<SessionHandle>>,
}

#[uniffi::export]
impl Session {
    /// Create a session backed by the shared store at `store_url`
    #[uniffi::constructor]
    pub fn new(store_url: String, auth_token: Option<String>) -> Result<Arc<Self>, CoreError> {
        TRACING_INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_target(false)
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
                )
                .with_writer(std::io::stderr)
                .init();
        });

        info!("Initializing watchsync session against {}", store_url);

        let runtime = Runtime::new().map_err(|e| CoreError::Internal(e.to_string()))?;
        let mut store = RestStore::new(store_url)?;
        if let Some(token) = auth_token {
            store = store.with_token(token);
        }

        Ok(Arc::new(Self {
            runtime,
            store: Arc::new(store),
            clock: Arc::new(SystemClock),
            player: RwLock::new(None),
            player_pushes_status: RwLock::new(false),
            callback: Arc::new(RwLock::new(None)),
            handle: RwLock::new(None),
        }))
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Drive a player implemented by the host app.
    ///
    /// With `pushes_status` the app reports status changes through
    /// `notify_player_status`; otherwise they are derived from polling.
    pub fn set_native_player(&self, player: Box<dyn NativePlayer>, pushes_status: bool) {
        let native: Arc<dyn NativePlayer> = Arc::from(player);
        *self.player.write() = Some(Arc::new(ForeignPlayer::new(native)));
        *self.player_pushes_status.write() = pushes_status;
    }

    /// Drive a local Cider instance over its HTTP API
    pub fn use_http_player(&self, port: u16, api_token: Option<String>) -> Result<(), CoreError> {
        let mut player = HttpPlayer::with_port(port).map_err(player_error)?;
        if let Some(token) = api_token {
            player = player.with_token(token);
        }

        debug!("Checking player connection on port {}...", port);
        match self.runtime.block_on(player.is_active()) {
            Ok(()) => info!("Player connection OK"),
            Err(e) => {
                warn!("Player connection failed: {:?}", e);
                return Err(player_error(e));
            }
        }

        *self.player.write() = Some(Arc::new(player));
        *self.player_pushes_status.write() = false;
        Ok(())
    }

    /// Create a room for `item_id` and join it. Returns the display room code.
    pub fn create_room(&self, item_id: String) -> Result<String, CoreError> {
        if self.handle.read().is_some() {
            return Err(CoreError::AlreadyInRoom);
        }

        let code = RoomCode::random();
        let client_id = new_client_id();
        info!("Creating room {}", code);

        self.runtime.block_on(session::create_room(
            self.store.as_ref(),
            code.as_str(),
            &item_id,
            &client_id,
            &self.clock,
        ))?;
        self.start(&code, client_id)?;
        Ok(code.to_string())
    }

    /// Join an existing room by its code (dash and case are ignored)
    pub fn join_room(&self, room_code: String) -> Result<(), CoreError> {
        if self.handle.read().is_some() {
            return Err(CoreError::AlreadyInRoom);
        }

        let code = RoomCode::parse(&room_code).ok_or(CoreError::InvalidRoomCode)?;
        info!("Joining room {}", code);
        self.start(&code, new_client_id())
    }

    /// Leave the current room
    pub fn leave_room(&self) -> Result<(), CoreError> {
        let handle = self.handle.write().take().ok_or(CoreError::NotInRoom)?;
        info!("Leaving room {}", handle.room_id());
        self.runtime.block_on(handle.leave());
        Ok(())
    }

    pub fn play(&self) -> Result<(), CoreError> {
        self.with_handle(|h| h.play())
    }

    pub fn pause(&self) -> Result<(), CoreError> {
        self.with_handle(|h| h.pause())
    }

    /// Seek the room to `position` seconds
    pub fn seek(&self, position: f64) -> Result<(), CoreError> {
        self.with_handle(|h| h.seek(position))
    }

    /// Switch the room to another item
    pub fn load_item(&self, item_id: String, autoplay: bool) -> Result<(), CoreError> {
        self.with_handle(|h| h.load_item(item_id, autoplay))
    }

    pub fn enqueue(&self, item_id: String) -> Result<(), CoreError> {
        self.with_handle(|h| h.enqueue(item_id))
    }

    pub fn remove_from_queue(&self, entry_id: String) -> Result<(), CoreError> {
        self.with_handle(|h| h.remove_entry(entry_id))
    }

    pub fn clear_queue(&self) -> Result<(), CoreError> {
        self.with_handle(|h| h.clear_queue())
    }

    /// Skip to the head of the queue
    pub fn play_next(&self) -> Result<(), CoreError> {
        self.with_handle(|h| h.play_next())
    }

    /// Report a status change from a native player that pushes events
    pub fn notify_player_status(&self, status: PlaybackStatus) -> Result<(), CoreError> {
        self.with_handle(|h| h.player_status_changed(status.into()))
    }

    pub fn room_code(&self) -> Option<String> {
        self.handle
            .read()
            .as_ref()
            .and_then(|h| RoomCode::parse(h.room_id()))
            .map(|code| code.to_string())
    }

    pub fn client_id(&self) -> Option<String> {
        self.handle.read().as_ref().map(|h| h.client_id().to_string())
    }

    pub fn is_in_room(&self) -> bool {
        self.handle.read().as_ref().is_some_and(|h| h.is_running())
    }

    /// Latest room state, with the playhead projected to now
    pub fn room_state(&self) -> Option<RoomSnapshot> {
        let guard = self.handle.read();
        let handle = guard.as_ref()?;
        let state = handle.room_state()?;
        let code = display_code(handle.room_id());
        Some(RoomSnapshot::from_state(&code, &state, self.clock.now_ms()))
    }

    pub fn queue(&self) -> Vec<QueueItem> {
        self.handle
            .read()
            .as_ref()
            .map(|h| h.queue().iter().map(QueueItem::from).collect())
            .unwrap_or_default()
    }

    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.handle
            .read()
            .as_ref()
            .map(|h| SyncStatus::from(&h.sync_status()))
    }
}

impl Session {
    fn start(&self, code: &RoomCode, client_id: String) -> Result<(), CoreError> {
        let player = self.player.read().clone().ok_or(CoreError::NoPlayer)?;
        let mut config = SessionConfig::new(code.as_str()).with_client_id(client_id);
        config.poll_player_status = !*self.player_pushes_status.read();

        let observer = Arc::new(CallbackObserver {
            callback: self.callback.clone(),
            clock: self.clock.clone(),
            room_code: code.to_string(),
        });

        let handle = self.runtime.block_on(session::start(
            config,
            self.store.clone(),
            player,
            self.clock.clone(),
            observer,
        ))?;
        *self.handle.write() = Some(handle);
        Ok(())
    }

    fn with_handle<F>(&self, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&SessionHandle) -> Result<(), SessionError>,
    {
        let guard = self.handle.read();
        let handle = guard.as_ref().ok_or(CoreError::NotInRoom)?;
        f(handle).map_err(CoreError::from)
    }
}

fn player_error(e: PlayerError) -> CoreError {
    match e {
        PlayerError::Unauthorized => CoreError::PlayerError("Invalid API token".to_string()),
        PlayerError::Api(msg) => CoreError::PlayerError(msg),
        other => CoreError::PlayerError(other.to_string()),
    }
}

fn display_code(room_id: &str) -> String {
    RoomCode::parse(room_id)
        .map(|code| code.to_string())
        .unwrap_or_else(|| room_id.to_string())
}

/// Forwards session events to the app's callback
struct CallbackObserver {
    callback: SharedCallback,
    clock: SharedClock,
    room_code: String,
}

impl CallbackObserver {
    fn callback(&self) -> Option<Arc<dyn SessionCallback>> {
        self.callback.read().clone()
    }
}

impl SessionObserver for CallbackObserver {
    fn on_connected(&self, room_id: &str, client_id: &str) {
        if let Some(cb) = self.callback() {
            debug!("Connected to {}", room_id);
            cb.on_connected(self.room_code.clone(), client_id.to_string());
        }
    }

    fn on_room_state(&self, state: &RoomState) {
        if let Some(cb) = self.callback() {
            let snapshot = RoomSnapshot::from_state(&self.room_code, state, self.clock.now_ms());
            cb.on_room_state_changed(snapshot);
        }
    }

    fn on_queue(&self, entries: &[QueueEntry]) {
        if let Some(cb) = self.callback() {
            cb.on_queue_changed(entries.iter().map(QueueItem::from).collect());
        }
    }

    fn on_position(&self, position: Option<f64>, status: PlayerStatus) {
        if let Some(cb) = self.callback() {
            cb.on_position(position, status.into());
        }
    }

    fn on_sync_status(&self, status: &InternalSyncStatus) {
        if let Some(cb) = self.callback() {
            cb.on_sync_status(SyncStatus::from(status));
        }
    }

    fn on_error(&self, error: &SessionError) {
        if let Some(cb) = self.callback() {
            cb.on_error(error.to_string());
        }
    }

    fn on_disconnected(&self) {
        if let Some(cb) = self.callback() {
            cb.on_disconnected();
        }
    }
}
