//! Queue Consumption Controller
//!
//! Watches for the room's item to end and promotes the head of the shared
//! queue. Every client runs one, so promotion goes through a claim: the
//! conditional remove decides which client gets to publish.

use tracing::{debug, info, warn};

use super::state::{queue_head, QueueEntry};
use crate::player::PlayerStatus;
use crate::store::SharedStore;

/// Where the controller is in a promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    Watching,
    Promoting,
}

/// How a promotion attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    /// We removed the entry; publish it as the room's item
    Claimed(QueueEntry),
    /// Another client removed it first
    Lost,
    /// The room already moved off the ended item
    Stale,
    /// Store I/O failed; the next poll may retry
    Failed(String),
}

#[derive(Debug)]
pub struct QueueController {
    phase: QueuePhase,
    entries: Vec<QueueEntry>,
    /// Ended item a promotion was already attempted for
    handled_item: Option<String>,
}

impl Default for QueueController {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueController {
    pub fn new() -> Self {
        Self {
            phase: QueuePhase::Watching,
            entries: Vec::new(),
            handled_item: None,
        }
    }

    pub fn phase(&self) -> QueuePhase {
        self.phase
    }

    /// Replace the local queue snapshot (already in FIFO order)
    pub fn set_entries(&mut self, entries: Vec<QueueEntry>) {
        self.entries = entries;
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        queue_head(&self.entries)
    }

    /// Feed one status poll. Returns the entry to promote when the room's
    /// item has just ended and something is queued.
    pub fn observe(
        &mut self,
        status: PlayerStatus,
        loaded_item: Option<&str>,
        room_item: &str,
    ) -> Option<QueueEntry> {
        if self.phase == QueuePhase::Promoting {
            return None;
        }
        if status != PlayerStatus::Ended {
            self.handled_item = None;
            return None;
        }
        if loaded_item != Some(room_item) {
            return None;
        }
        if self.handled_item.as_deref() == Some(room_item) {
            return None;
        }

        // Nothing queued: keep watching so a later enqueue still promotes
        let head = self.head()?.clone();

        info!("{} ended, promoting {} from the queue", room_item, head.item_id);
        self.handled_item = Some(room_item.to_string());
        self.phase = QueuePhase::Promoting;
        Some(head)
    }

    /// Start a user-requested skip to the head, whatever the player is doing
    pub fn begin_manual(&mut self) -> Option<QueueEntry> {
        if self.phase == QueuePhase::Promoting {
            return None;
        }
        let head = self.head()?.clone();
        self.phase = QueuePhase::Promoting;
        Some(head)
    }

    /// Return to watching after a promotion attempt
    pub fn finish(&mut self, outcome: &PromotionOutcome) {
        self.phase = QueuePhase::Watching;
        match outcome {
            PromotionOutcome::Claimed(entry) => {
                self.entries.retain(|e| e.id != entry.id);
            }
            PromotionOutcome::Failed(_) => {
                self.handled_item = None;
            }
            PromotionOutcome::Lost | PromotionOutcome::Stale => {}
        }
    }
}

/// Try to take `head` off the queue.
///
/// With `ended_item` set, first re-reads the room and gives up if it no
/// longer names that item. Two clients can still each claim a different
/// entry if both re-read before either publish lands.
pub async fn claim_head(
    store: &dyn SharedStore,
    room_id: &str,
    ended_item: Option<&str>,
    head: &QueueEntry,
) -> PromotionOutcome {
    if let Some(ended) = ended_item {
        match store.fetch_room(room_id).await {
            Ok(Some(room)) if room.item_id == ended => {}
            Ok(_) => {
                debug!("Room moved off {}, not promoting", ended);
                return PromotionOutcome::Stale;
            }
            Err(e) => {
                warn!("Failed to re-read room before promotion: {}", e);
                return PromotionOutcome::Failed(e.to_string());
            }
        }
    }

    match store.remove_queue(room_id, &head.id).await {
        Ok(true) => {
            info!("Claimed queue entry {} ({})", head.id, head.item_id);
            PromotionOutcome::Claimed(head.clone())
        }
        Ok(false) => {
            debug!("Queue entry {} already taken", head.id);
            PromotionOutcome::Lost
        }
        Err(e) => {
            warn!("Failed to claim queue entry {}: {}", head.id, e);
            PromotionOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::sync::{QueueEntryRecord, RoomPatch, RoomState};
    use std::sync::Arc;

    const ROOM: &str = "ROOM";

    async fn store_with_queue(items: &[&str]) -> MemoryStore {
        let store = MemoryStore::new(Arc::new(ManualClock::new(0)));
        store
            .set_room(ROOM, &RoomState::new("X", "host", 0))
            .await
            .unwrap();
        for (i, item) in items.iter().enumerate() {
            store
                .push_queue(ROOM, &QueueEntryRecord::new(*item, "c", i as u64 + 1))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_promotes_in_fifo_order() {
        let store = store_with_queue(&["A", "B", "C"]).await;
        let mut controller = QueueController::new();
        let mut played = Vec::new();
        let mut current = "X".to_string();

        for _ in 0..3 {
            controller.set_entries(store.fetch_queue(ROOM).await.unwrap());
            assert!(controller
                .observe(PlayerStatus::Playing, Some(current.as_str()), &current)
                .is_none());

            let head = controller
                .observe(PlayerStatus::Ended, Some(current.as_str()), &current)
                .unwrap();
            let outcome = claim_head(&store, ROOM, Some(current.as_str()), &head).await;
            controller.finish(&outcome);

            let PromotionOutcome::Claimed(entry) = outcome else {
                panic!("expected claim, got {:?}", outcome);
            };
            store
                .update_room(ROOM, &RoomPatch::new().item(entry.item_id.clone()))
                .await
                .unwrap();
            current = entry.item_id.clone();
            played.push(entry.item_id);
        }

        assert_eq!(played, vec!["A", "B", "C"]);
        assert!(store.fetch_queue(ROOM).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_promotion_per_ended_item() {
        let store = store_with_queue(&["A", "B"]).await;
        let mut controller = QueueController::new();
        controller.set_entries(store.fetch_queue(ROOM).await.unwrap());

        assert!(controller.observe(PlayerStatus::Ended, Some("X"), "X").is_some());
        // Still promoting
        assert!(controller.observe(PlayerStatus::Ended, Some("X"), "X").is_none());
        assert_eq!(controller.phase(), QueuePhase::Promoting);

        controller.finish(&PromotionOutcome::Lost);
        assert!(controller.observe(PlayerStatus::Ended, Some("X"), "X").is_none());
    }

    #[tokio::test]
    async fn test_failed_claim_allows_retry() {
        let mut controller = QueueController::new();
        controller.set_entries(store_with_queue(&["A"]).await.fetch_queue(ROOM).await.unwrap());

        assert!(controller.observe(PlayerStatus::Ended, Some("X"), "X").is_some());
        controller.finish(&PromotionOutcome::Failed("offline".into()));
        assert!(controller.observe(PlayerStatus::Ended, Some("X"), "X").is_some());
    }

    #[test]
    fn test_empty_queue_keeps_watching() {
        let mut controller = QueueController::new();
        assert!(controller.observe(PlayerStatus::Ended, Some("X"), "X").is_none());
        assert_eq!(controller.phase(), QueuePhase::Watching);

        controller.set_entries(vec![QueueEntry::from_record(
            "k1",
            QueueEntryRecord::new("A", "c", 1),
        )]);
        assert_eq!(
            controller
                .observe(PlayerStatus::Ended, Some("X"), "X")
                .map(|e| e.item_id),
            Some("A".to_string())
        );
    }

    #[test]
    fn test_other_item_ending_is_ignored() {
        let mut controller = QueueController::new();
        controller.set_entries(vec![QueueEntry::from_record(
            "k1",
            QueueEntryRecord::new("A", "c", 1),
        )]);
        // Local player finished something the room no longer names
        assert!(controller.observe(PlayerStatus::Ended, Some("OLD"), "X").is_none());
    }

    #[tokio::test]
    async fn test_two_clients_race_for_head() {
        let store = store_with_queue(&["A", "B"]).await;
        let head = store.fetch_queue(ROOM).await.unwrap()[0].clone();

        let first = claim_head(&store, ROOM, Some("X"), &head).await;
        let second = claim_head(&store, ROOM, Some("X"), &head).await;

        assert!(matches!(first, PromotionOutcome::Claimed(_)));
        assert_eq!(second, PromotionOutcome::Lost);
        assert_eq!(store.fetch_queue(ROOM).await.unwrap()[0].item_id, "B");
    }

    #[tokio::test]
    async fn test_stale_when_room_moved() {
        let store = store_with_queue(&["A"]).await;
        let head = store.fetch_queue(ROOM).await.unwrap()[0].clone();
        store
            .update_room(ROOM, &RoomPatch::new().item("Y"))
            .await
            .unwrap();

        assert_eq!(claim_head(&store, ROOM, Some("X"), &head).await, PromotionOutcome::Stale);
        // Entry untouched
        assert_eq!(store.fetch_queue(ROOM).await.unwrap().len(), 1);

        // A manual skip does not check the room
        assert!(matches!(
            claim_head(&store, ROOM, None, &head).await,
            PromotionOutcome::Claimed(_)
        ));
    }
}
