//! Session statistics for the console client

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use tracing::{info, warn};
use watchsync_core::session::{SessionError, SessionObserver};
use watchsync_core::sync::{QueueEntry, RoomState, SyncStatus};

use crate::commands::format_position;

/// Maximum number of events to keep
const MAX_EVENTS: usize = 50;

/// Something worth showing in `status`
#[derive(Clone)]
pub struct EventEntry {
    pub timestamp: DateTime<Local>,
    pub kind: EventKind,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventKind {
    Room,
    Queue,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Room => "ROOM",
            EventKind::Queue => "QUEUE",
            EventKind::Error => "ERROR",
        }
    }
}

/// Counters for one run of the client
pub struct Stats {
    pub start_time: DateTime<Local>,
    pub room_updates: u64,
    pub snapshots_applied: u64,
    pub corrections: u64,
    pub echoes_suppressed: u64,
    pub promotions: u64,
    pub write_failures: u64,
    pub last_drift_secs: Option<f64>,
    pub connected: bool,
    pub events: VecDeque<EventEntry>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            room_updates: 0,
            snapshots_applied: 0,
            corrections: 0,
            echoes_suppressed: 0,
            promotions: 0,
            write_failures: 0,
            last_drift_secs: None,
            connected: false,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn event(&mut self, kind: EventKind, message: impl Into<String>) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(EventEntry {
            timestamp: Local::now(),
            kind,
            message: message.into(),
        });
    }

    /// Take the engine's cumulative counters
    pub fn sync_status(&mut self, status: &SyncStatus) {
        self.snapshots_applied = status.snapshots_applied;
        self.corrections = status.corrections;
        self.echoes_suppressed = status.echoes_suppressed;
        self.last_drift_secs = status.last_drift_secs;
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let secs = Local::now().signed_duration_since(self.start_time).num_seconds();
        format_uptime(secs)
    }

    pub fn summary(&self) -> String {
        let drift = self
            .last_drift_secs
            .map(|d| format!("{:+.0}ms", d * 1000.0))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "up {} since {} | updates {} applied {} corrections {} echoes {} promotions {} write failures {} | drift {}",
            self.uptime(),
            self.start_time.format("%H:%M:%S"),
            self.room_updates,
            self.snapshots_applied,
            self.corrections,
            self.echoes_suppressed,
            self.promotions,
            self.write_failures,
            drift,
        )
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

fn format_uptime(secs: i64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Feeds session events into [`Stats`] and the log
pub struct StatsObserver {
    stats: RwLock<Stats>,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(Stats::new()),
        }
    }

    pub fn summary(&self) -> String {
        self.stats.read().summary()
    }

    pub fn recent_events(&self, count: usize) -> Vec<String> {
        let stats = self.stats.read();
        let skip = stats.events.len().saturating_sub(count);
        stats
            .events
            .iter()
            .skip(skip)
            .map(|e| {
                format!(
                    "{} [{}] {}",
                    e.timestamp.format("%H:%M:%S"),
                    e.kind.as_str(),
                    e.message
                )
            })
            .collect()
    }

    #[cfg(test)]
    fn with_stats<R>(&self, f: impl FnOnce(&Stats) -> R) -> R {
        f(&self.stats.read())
    }
}

impl SessionObserver for StatsObserver {
    fn on_connected(&self, room_id: &str, client_id: &str) {
        info!("Connected to room {} as {}", room_id, client_id);
        let mut stats = self.stats.write();
        stats.connected = true;
        stats.event(EventKind::Room, format!("joined {} as {}", room_id, client_id));
    }

    fn on_room_state(&self, state: &RoomState) {
        let mut stats = self.stats.write();
        stats.room_updates += 1;
        stats.event(
            EventKind::Room,
            format!(
                "{} {} at {} by {}",
                if state.is_playing { "playing" } else { "paused" },
                state.item_id,
                format_position(state.position),
                state.updated_by
            ),
        );
    }

    fn on_queue(&self, entries: &[QueueEntry]) {
        let items: Vec<&str> = entries.iter().map(|e| e.item_id.as_str()).collect();
        self.stats
            .write()
            .event(EventKind::Queue, format!("queue [{}]", items.join(", ")));
    }

    fn on_sync_status(&self, status: &SyncStatus) {
        self.stats.write().sync_status(status);
    }

    fn on_promoted(&self, entry: &QueueEntry) {
        info!("Promoted {} from the queue", entry.item_id);
        let mut stats = self.stats.write();
        stats.promotions += 1;
        stats.event(EventKind::Queue, format!("promoted {}", entry.item_id));
    }

    fn on_error(&self, error: &SessionError) {
        warn!("Session error: {}", error);
        let mut stats = self.stats.write();
        stats.write_failures += 1;
        stats.event(EventKind::Error, error.to_string());
    }

    fn on_disconnected(&self) {
        info!("Disconnected");
        self.stats.write().connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_format() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(7260), "2h 1m");
    }

    #[test]
    fn test_event_buffer_is_bounded() {
        let mut stats = Stats::new();
        for i in 0..(MAX_EVENTS + 10) {
            stats.event(EventKind::Room, format!("event {}", i));
        }
        assert_eq!(stats.events.len(), MAX_EVENTS);
        assert_eq!(stats.events.front().unwrap().message, "event 10");
    }

    #[test]
    fn test_observer_counts() {
        let observer = StatsObserver::new();
        let state = RoomState::new("X", "c1", 0);
        observer.on_connected("ROOM", "c2");
        observer.on_room_state(&state);
        observer.on_room_state(&state);
        observer.on_error(&SessionError::Closed);
        observer.on_sync_status(&SyncStatus {
            corrections: 3,
            snapshots_applied: 2,
            ..Default::default()
        });

        observer.with_stats(|s| {
            assert!(s.connected);
            assert_eq!(s.room_updates, 2);
            assert_eq!(s.write_failures, 1);
            assert_eq!(s.corrections, 3);
            assert_eq!(s.snapshots_applied, 2);
        });
        let recent = observer.recent_events(2);
        assert_eq!(recent.len(), 2);
        assert!(recent[1].contains("[ERROR]"));
    }
}
