//! Append-only write log
//!
//! Every write a store accepts is recorded here before it becomes visible.
//! A room's visible state is the fold of its records through
//! [`RoomView::reduce`], so commit order alone decides last-write-wins.

use std::collections::BTreeMap;

use crate::sync::{sort_fifo, QueueEntry, QueueEntryRecord, RoomPatch, RoomState};

/// One accepted write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    SetRoom(RoomState),
    MergeRoom(RoomPatch),
    PushEntry { id: String, record: QueueEntryRecord },
    RemoveEntry { id: String },
    ClearQueue,
}

/// A write together with where it landed in commit order
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Position in the log, starting at 1
    pub commit: u64,
    /// Store clock when the write was committed
    pub at_ms: u64,
    pub room_id: String,
    pub op: WriteOp,
}

/// What a reduced write changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub room_changed: bool,
    pub queue_changed: bool,
}

/// Reduced state of one room
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomView {
    pub state: Option<RoomState>,
    pub queue: BTreeMap<String, QueueEntryRecord>,
}

impl RoomView {
    /// Fold one write into the view
    pub fn reduce(&mut self, op: &WriteOp) -> Effect {
        match op {
            WriteOp::SetRoom(state) => {
                self.state = Some(state.clone());
                Effect {
                    room_changed: true,
                    queue_changed: false,
                }
            }
            WriteOp::MergeRoom(patch) => match self.state.as_mut() {
                Some(state) => {
                    state.merge(patch);
                    Effect {
                        room_changed: true,
                        queue_changed: false,
                    }
                }
                // Nothing to merge into
                None => Effect::default(),
            },
            WriteOp::PushEntry { id, record } => {
                self.queue.insert(id.clone(), record.clone());
                Effect {
                    room_changed: false,
                    queue_changed: true,
                }
            }
            WriteOp::RemoveEntry { id } => Effect {
                room_changed: false,
                queue_changed: self.queue.remove(id).is_some(),
            },
            WriteOp::ClearQueue => {
                let had_entries = !self.queue.is_empty();
                self.queue.clear();
                Effect {
                    room_changed: false,
                    queue_changed: had_entries,
                }
            }
        }
    }

    /// Queue entries in FIFO order
    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self
            .queue
            .iter()
            .map(|(id, record)| QueueEntry::from_record(id.clone(), record.clone()))
            .collect();
        sort_fifo(&mut entries);
        entries
    }
}

/// The log itself
#[derive(Debug, Default)]
pub struct WriteLog {
    records: Vec<LogRecord>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write and return its commit number
    pub fn append(&mut self, room_id: &str, at_ms: u64, op: WriteOp) -> &LogRecord {
        let commit = self.records.len() as u64 + 1;
        self.records.push(LogRecord {
            commit,
            at_ms,
            room_id: room_id.to_string(),
            op,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rebuild a room's view from scratch
    pub fn replay(&self, room_id: &str) -> RoomView {
        let mut view = RoomView::default();
        for record in self.records.iter().filter(|r| r.room_id == room_id) {
            view.reduce(&record.op);
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins_by_commit_order() {
        let mut log = WriteLog::new();
        log.append("r", 1, WriteOp::SetRoom(RoomState::new("A", "h", 1)));
        // Written later on a slower clock, committed later: still wins
        log.append("r", 0, WriteOp::MergeRoom(RoomPatch::new().position(5.0).stamped(900, "c2", 1)));
        log.append("r", 2, WriteOp::MergeRoom(RoomPatch::new().playing(true)));

        let view = log.replay("r");
        let state = view.state.unwrap();
        assert_eq!(state.position, 5.0);
        assert!(state.is_playing);
        assert_eq!(state.updated_by, "c2");
        assert_eq!(state.item_id, "A");
    }

    #[test]
    fn test_merge_without_room_is_ignored() {
        let mut view = RoomView::default();
        let effect = view.reduce(&WriteOp::MergeRoom(RoomPatch::new().playing(true)));
        assert_eq!(effect, Effect::default());
        assert!(view.state.is_none());
    }

    #[test]
    fn test_remove_reports_change_once() {
        let mut view = RoomView::default();
        view.reduce(&WriteOp::PushEntry {
            id: "k1".into(),
            record: QueueEntryRecord::new("A", "c", 1),
        });

        let remove = WriteOp::RemoveEntry { id: "k1".into() };
        assert!(view.reduce(&remove).queue_changed);
        assert!(!view.reduce(&remove).queue_changed);
        assert!(view.queue_entries().is_empty());
    }

    #[test]
    fn test_replay_is_per_room() {
        let mut log = WriteLog::new();
        log.append("r1", 1, WriteOp::SetRoom(RoomState::new("A", "h", 1)));
        log.append("r2", 2, WriteOp::SetRoom(RoomState::new("B", "h", 2)));
        log.append(
            "r1",
            3,
            WriteOp::PushEntry {
                id: "k1".into(),
                record: QueueEntryRecord::new("C", "c", 3),
            },
        );

        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[2].commit, 3);
        let r1 = log.replay("r1");
        assert_eq!(r1.state.as_ref().unwrap().item_id, "A");
        assert_eq!(r1.queue_entries().len(), 1);
        assert!(log.replay("r2").queue.is_empty());
    }
}
