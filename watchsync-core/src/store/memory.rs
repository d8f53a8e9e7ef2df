//! In-process store
//!
//! Writes go through the [`WriteLog`]; each room's visible state is the
//! reduced view, pushed to subscribers over watch channels after every
//! commit that changed it.
//!
//! The log is never compacted: it grows by one record per write for the
//! lifetime of the store, which suits tests and short demo sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::log::{LogRecord, RoomView, WriteLog, WriteOp};
use super::{QueueWatch, RoomWatch, SharedStore, StoreError, StoreResult};
use crate::clock::SharedClock;
use crate::sync::{QueueEntry, QueueEntryRecord, RoomPatch, RoomState};

struct RoomSlot {
    view: RoomView,
    room_tx: watch::Sender<Option<RoomState>>,
    queue_tx: watch::Sender<Vec<QueueEntry>>,
}

impl RoomSlot {
    fn new() -> Self {
        let (room_tx, _) = watch::channel(None);
        let (queue_tx, _) = watch::channel(Vec::new());
        Self {
            view: RoomView::default(),
            room_tx,
            queue_tx,
        }
    }
}

#[derive(Default)]
struct Inner {
    log: WriteLog,
    rooms: HashMap<String, RoomSlot>,
    next_entry: u64,
}

impl Inner {
    fn slot(&mut self, room_id: &str) -> &mut RoomSlot {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomSlot::new)
    }

    /// Append to the log, reduce, and notify
    fn commit(&mut self, room_id: &str, at_ms: u64, op: WriteOp) {
        let slot = self.slot(room_id);
        let effect = slot.view.reduce(&op);
        if effect.room_changed {
            slot.room_tx.send_replace(slot.view.state.clone());
        }
        if effect.queue_changed {
            slot.queue_tx.send_replace(slot.view.queue_entries());
        }
        let record = self.log.append(room_id, at_ms, op);
        debug!("Committed #{} to room {}", record.commit, room_id);
    }
}

/// Store living in this process; shared by every client holding an `Arc` to it
pub struct MemoryStore {
    clock: SharedClock,
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until reset
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Copy of every accepted write, in commit order
    pub fn log_records(&self) -> Vec<LogRecord> {
        self.inner.lock().log.records().to_vec()
    }

    /// Rebuild a room from the log alone
    pub fn replay(&self, room_id: &str) -> RoomView {
        self.inner.lock().log.replay(room_id)
    }

    /// Current room record without going through the async API
    pub fn peek_room(&self, room_id: &str) -> Option<RoomState> {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .and_then(|slot| slot.view.state.clone())
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set_room(&self, room_id: &str, state: &RoomState) -> StoreResult<()> {
        self.check_online()?;
        let now = self.clock.now_ms();
        self.inner
            .lock()
            .commit(room_id, now, WriteOp::SetRoom(state.clone()));
        Ok(())
    }

    async fn update_room(&self, room_id: &str, patch: &RoomPatch) -> StoreResult<()> {
        self.check_online()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let exists = inner
            .rooms
            .get(room_id)
            .is_some_and(|slot| slot.view.state.is_some());
        if !exists {
            return Err(StoreError::RoomNotFound(room_id.to_string()));
        }
        inner.commit(room_id, now, WriteOp::MergeRoom(patch.clone()));
        Ok(())
    }

    async fn fetch_room(&self, room_id: &str) -> StoreResult<Option<RoomState>> {
        self.check_online()?;
        Ok(self.peek_room(room_id))
    }

    async fn subscribe_room(&self, room_id: &str) -> StoreResult<RoomWatch> {
        self.check_online()?;
        Ok(self.inner.lock().slot(room_id).room_tx.subscribe())
    }

    async fn push_queue(&self, room_id: &str, entry: &QueueEntryRecord) -> StoreResult<String> {
        self.check_online()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        inner.next_entry += 1;
        // Zero-padded so key order is commit order
        let id = format!("q{:012}", inner.next_entry);
        inner.commit(
            room_id,
            now,
            WriteOp::PushEntry {
                id: id.clone(),
                record: entry.clone(),
            },
        );
        Ok(id)
    }

    async fn remove_queue(&self, room_id: &str, entry_id: &str) -> StoreResult<bool> {
        self.check_online()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let present = inner
            .rooms
            .get(room_id)
            .is_some_and(|slot| slot.view.queue.contains_key(entry_id));
        if !present {
            return Ok(false);
        }
        inner.commit(
            room_id,
            now,
            WriteOp::RemoveEntry {
                id: entry_id.to_string(),
            },
        );
        Ok(true)
    }

    async fn clear_queue(&self, room_id: &str) -> StoreResult<()> {
        self.check_online()?;
        let now = self.clock.now_ms();
        self.inner.lock().commit(room_id, now, WriteOp::ClearQueue);
        Ok(())
    }

    async fn fetch_queue(&self, room_id: &str) -> StoreResult<Vec<QueueEntry>> {
        self.check_online()?;
        Ok(self
            .inner
            .lock()
            .rooms
            .get(room_id)
            .map(|slot| slot.view.queue_entries())
            .unwrap_or_default())
    }

    async fn subscribe_queue(&self, room_id: &str) -> StoreResult<QueueWatch> {
        self.check_online()?;
        Ok(self.inner.lock().slot(room_id).queue_tx.subscribe())
    }
}
