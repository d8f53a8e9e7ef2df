//! Session actor and its event handlers

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Command, SessionConfig, SessionError, SessionObserver, SessionView};
use crate::clock::SharedClock;
use crate::player::{PlayerAdapter, PlayerStatus};
use crate::store::{QueueWatch, RoomWatch, SharedStore, StoreError, StoreResult};
use crate::sync::{
    claim_head, intent_for_status, Intent, IntentPublisher, PromotionOutcome, QueueController,
    QueueEntry, QueueEntryRecord, Reconciler, RoomState, SnapshotOutcome,
};

/// Completion of work the actor spawned
#[derive(Debug)]
enum TaskDone {
    Write {
        seq: u64,
        label: &'static str,
        result: StoreResult<()>,
    },
    /// The in-flight window after a write has closed
    Released,
    Promotion(PromotionOutcome),
    QueueOp {
        what: &'static str,
        result: StoreResult<()>,
    },
}

pub(super) struct Actor {
    config: SessionConfig,
    store: Arc<dyn SharedStore>,
    player: Arc<dyn PlayerAdapter>,
    clock: SharedClock,
    observer: Arc<dyn SessionObserver>,
    room_rx: RoomWatch,
    queue_rx: QueueWatch,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    view: Arc<RwLock<SessionView>>,
    done_tx: mpsc::UnboundedSender<TaskDone>,
    done_rx: mpsc::UnboundedReceiver<TaskDone>,
    publisher: IntentPublisher,
    engine: Reconciler,
    queue: QueueController,
    last_status: Option<PlayerStatus>,
}

impl Actor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: SessionConfig,
        store: Arc<dyn SharedStore>,
        player: Arc<dyn PlayerAdapter>,
        clock: SharedClock,
        observer: Arc<dyn SessionObserver>,
        room_rx: RoomWatch,
        queue_rx: QueueWatch,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
        view: Arc<RwLock<SessionView>>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let publisher =
            IntentPublisher::with_release_delay(config.client_id.clone(), config.echo_release_delay);
        let engine = Reconciler::new(config.drift_threshold, config.quiescence.as_millis() as u64);

        Self {
            config,
            store,
            player,
            clock,
            observer,
            room_rx,
            queue_rx,
            commands,
            cancel,
            view,
            done_tx,
            done_rx,
            publisher,
            engine,
            queue: QueueController::new(),
            last_status: None,
        }
    }

    fn ticker(period: std::time::Duration) -> time::Interval {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    pub(super) async fn run(mut self) {
        info!("Session loop started for room {}", self.config.room_id);

        let initial_room = self.room_rx.borrow_and_update().clone();
        if let Some(state) = initial_room {
            self.handle_snapshot(state).await;
        }
        let initial_queue = self.queue_rx.borrow_and_update().clone();
        self.handle_queue(initial_queue);
        self.last_status = self.player.status().await.ok();

        let mut drift_tick = Self::ticker(self.config.drift_check_interval);
        let mut sample_tick = Self::ticker(self.config.sample_interval);
        let mut end_poll = Self::ticker(self.config.end_poll_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Session loop cancelled");
                    break;
                }
                changed = self.room_rx.changed() => {
                    if changed.is_err() {
                        warn!("Room subscription closed");
                        self.observer.on_error(&SessionError::Store(StoreError::Closed));
                        break;
                    }
                    let snapshot = self.room_rx.borrow_and_update().clone();
                    match snapshot {
                        Some(state) => self.handle_snapshot(state).await,
                        None => warn!("Room {} no longer exists", self.config.room_id),
                    }
                }
                changed = self.queue_rx.changed() => {
                    if changed.is_err() {
                        warn!("Queue subscription closed");
                        self.observer.on_error(&SessionError::Store(StoreError::Closed));
                        break;
                    }
                    let entries = self.queue_rx.borrow_and_update().clone();
                    self.handle_queue(entries);
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }
                Some(done) = self.done_rx.recv() => {
                    self.handle_done(done).await;
                }
                _ = drift_tick.tick() => {
                    self.handle_drift_tick().await;
                }
                _ = sample_tick.tick() => {
                    self.handle_sample_tick().await;
                }
                _ = end_poll.tick() => {
                    self.handle_end_poll().await;
                }
            }
        }

        self.observer.on_disconnected();
        info!("Left room {}", self.config.room_id);
    }

    fn refresh_view(&self) {
        let mut view = self.view.write();
        view.room = self.engine.baseline().cloned();
        view.queue = self.queue.entries().to_vec();
        view.sync = self.engine.sync_status();
    }

    fn in_flight(&self) -> bool {
        self.publisher.in_flight(Instant::now())
    }

    async fn handle_snapshot(&mut self, state: RoomState) {
        let now = self.clock.now_ms();
        let echo = self.publisher.is_echo(&state);
        let in_flight = self.in_flight();
        self.observer.on_room_state(&state);

        let outcome = self
            .engine
            .on_snapshot(state, echo, in_flight, self.player.as_ref(), now)
            .await;
        if let SnapshotOutcome::Applied(report) = &outcome {
            if report.acted() {
                debug!("Applied room state: {:?}", report);
            }
        }
        self.refresh_view();
    }

    fn handle_queue(&mut self, entries: Vec<QueueEntry>) {
        debug!("Queue now has {} entries", entries.len());
        self.observer.on_queue(&entries);
        self.queue.set_entries(entries);
        self.refresh_view();
    }

    async fn handle_command(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::Play => {
                match self.player.play().await {
                    Ok(()) => self.refresh_local_status().await,
                    Err(e) => self.observer.on_error(&SessionError::Player(e)),
                }
            }
            Command::Pause => {
                match self.player.pause().await {
                    Ok(()) => self.refresh_local_status().await,
                    Err(e) => self.observer.on_error(&SessionError::Player(e)),
                }
            }
            Command::Seek(position) => {
                if !position.is_finite() {
                    warn!("Ignoring seek to {}", position);
                    return;
                }
                let position = position.max(0.0);
                if let Err(e) = self.player.seek(position).await {
                    self.observer.on_error(&SessionError::Player(e));
                }
                self.engine.note_seek(self.clock.now_ms());
                let is_playing = self.engine.baseline().is_some_and(|b| b.is_playing);
                self.publish(Intent::Seek {
                    position,
                    is_playing,
                });
            }
            Command::LoadItem { item_id, autoplay } => {
                self.publish(Intent::ChangeItem { item_id, autoplay });
                let now = self.clock.now_ms();
                self.engine.apply_local(self.player.as_ref(), now).await;
                self.last_status = self.player.status().await.ok();
            }
            Command::Enqueue(item_id) => {
                let record =
                    QueueEntryRecord::new(item_id, self.config.client_id.clone(), self.clock.now_ms());
                let store = self.store.clone();
                let room_id = self.config.room_id.clone();
                self.spawn_queue_op("enqueue", async move {
                    store.push_queue(&room_id, &record).await.map(|_| ())
                });
            }
            Command::RemoveEntry(entry_id) => {
                let store = self.store.clone();
                let room_id = self.config.room_id.clone();
                self.spawn_queue_op("remove", async move {
                    store.remove_queue(&room_id, &entry_id).await.map(|_| ())
                });
            }
            Command::ClearQueue => {
                let store = self.store.clone();
                let room_id = self.config.room_id.clone();
                self.spawn_queue_op("clear", async move { store.clear_queue(&room_id).await });
            }
            Command::PlayNext => match self.queue.begin_manual() {
                Some(head) => self.spawn_promotion(head, None),
                None => debug!("Nothing queued to skip to"),
            },
            Command::PlayerStatusChanged(status) => {
                self.on_player_status(status, false).await;
            }
        }
        self.refresh_view();
    }

    /// Read the player's status right after a user transport command
    async fn refresh_local_status(&mut self) {
        match self.player.status().await {
            Ok(status) => self.on_player_status(status, true).await,
            Err(e) => debug!("Status read failed: {}", e),
        }
    }

    /// Turn a local status transition into a publish when it changes the room
    async fn on_player_status(&mut self, status: PlayerStatus, from_user: bool) {
        let previous = self.last_status.replace(status);
        if previous == Some(status) {
            return;
        }
        if previous.is_none() && !from_user {
            // First observation only sets the reference point
            return;
        }
        debug!("Player status now {}", status);

        if !from_user {
            let now = self.clock.now_ms();
            if self.engine.engine_acted_within(now) || self.engine.is_deferred() {
                debug!("Status change follows a remote apply, not publishing");
                return;
            }
        }

        let position = match self.player.current_time().await {
            Ok(position) => position,
            Err(e) => {
                debug!("Position read failed: {}", e);
                return;
            }
        };
        if let Some(intent) = intent_for_status(status, position, self.engine.baseline()) {
            self.publish(intent);
        }
    }

    /// Stamp an intent, assume it locally and write it in the background
    fn publish(&mut self, intent: Intent) {
        let write = self.publisher.prepare(intent, self.clock.now_ms());
        debug!("Publishing {} (seq {})", write.label, write.seq);
        self.engine.assume(&write.patch);

        let store = self.store.clone();
        let room_id = self.config.room_id.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store.update_room(&room_id, &write.patch).await;
            let _ = done_tx.send(TaskDone::Write {
                seq: write.seq,
                label: write.label,
                result,
            });
        });
    }

    fn spawn_queue_op<F>(&self, what: &'static str, op: F)
    where
        F: std::future::Future<Output = StoreResult<()>> + Send + 'static,
    {
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = op.await;
            let _ = done_tx.send(TaskDone::QueueOp { what, result });
        });
    }

    fn spawn_promotion(&self, head: QueueEntry, ended_item: Option<String>) {
        let store = self.store.clone();
        let room_id = self.config.room_id.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let outcome = claim_head(store.as_ref(), &room_id, ended_item.as_deref(), &head).await;
            let _ = done_tx.send(TaskDone::Promotion(outcome));
        });
    }

    async fn handle_done(&mut self, done: TaskDone) {
        match done {
            TaskDone::Write { seq, label, result } => {
                let release_at = self.publisher.complete(seq, Instant::now());
                if let Err(e) = result {
                    warn!("Failed to publish {} (seq {}): {}", label, seq, e);
                    let latest = self.room_rx.borrow().clone();
                    self.engine.rebase(latest);
                    self.observer.on_error(&SessionError::Store(e));
                }
                let done_tx = self.done_tx.clone();
                tokio::spawn(async move {
                    time::sleep_until(release_at).await;
                    let _ = done_tx.send(TaskDone::Released);
                });
            }
            TaskDone::Released => {
                if !self.in_flight() && self.engine.is_deferred() {
                    let now = self.clock.now_ms();
                    self.engine
                        .on_drift_tick(false, self.player.as_ref(), now)
                        .await;
                }
            }
            TaskDone::Promotion(outcome) => {
                self.queue.finish(&outcome);
                match outcome {
                    PromotionOutcome::Claimed(entry) => {
                        self.observer.on_promoted(&entry);
                        self.publish(Intent::Advance {
                            item_id: entry.item_id.clone(),
                        });
                        let now = self.clock.now_ms();
                        self.engine.apply_local(self.player.as_ref(), now).await;
                        self.last_status = self.player.status().await.ok();
                    }
                    PromotionOutcome::Failed(reason) => {
                        self.observer.on_error(&SessionError::Promotion(reason));
                    }
                    PromotionOutcome::Lost | PromotionOutcome::Stale => {}
                }
            }
            TaskDone::QueueOp { what, result } => {
                if let Err(e) = result {
                    warn!("Queue {} failed: {}", what, e);
                    self.observer.on_error(&SessionError::Store(e));
                }
            }
        }
        self.refresh_view();
    }

    async fn handle_drift_tick(&mut self) {
        let now = self.clock.now_ms();
        let in_flight = self.in_flight();
        if let Some(report) = self
            .engine
            .on_drift_tick(in_flight, self.player.as_ref(), now)
            .await
        {
            if report.acted() {
                debug!("Drift tick: {:?}", report);
            }
        }
        self.refresh_view();
        self.observer.on_sync_status(&self.engine.sync_status());
    }

    async fn handle_sample_tick(&mut self) {
        let status = match self.player.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!("Player status unavailable: {}", e);
                return;
            }
        };
        let position = self.player.current_time().await.ok();
        self.observer.on_position(position, status);

        if self.config.poll_player_status {
            self.on_player_status(status, false).await;
        }
    }

    async fn handle_end_poll(&mut self) {
        let Some(room_item) = self.engine.baseline().map(|b| b.item_id.clone()) else {
            return;
        };
        let status = match self.player.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!("Player status unavailable: {}", e);
                return;
            }
        };
        let loaded = self.player.current_item().await.ok().flatten();

        if let Some(head) = self.queue.observe(status, loaded.as_deref(), &room_item) {
            self.spawn_promotion(head, Some(room_item));
        }
    }
}
