//! Simulated player
//!
//! Keeps a playhead that advances on a [`Clock`](crate::clock::Clock) while
//! playing and stops at the item's duration. Used by the CLI's simulated
//! mode and by tests, which can also make it refuse commands or jump ahead.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{PlayerAdapter, PlayerError, PlayerResult, PlayerStatus};
use crate::clock::SharedClock;

/// Duration given to every loaded item unless overridden
pub const DEFAULT_DURATION_SECS: f64 = 300.0;

/// Most recent control calls kept for inspection
pub const MAX_RECORDED_CALLS: usize = 256;

/// A control call the player received
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    Load(String),
    Play,
    Pause,
    Seek(f64),
}

#[derive(Debug)]
struct SimState {
    item: Option<String>,
    playing: bool,
    /// Playhead at `anchor_ms`
    base_position: f64,
    anchor_ms: u64,
    duration: f64,
    ready: bool,
    calls: VecDeque<PlayerCall>,
}

impl SimState {
    fn record(&mut self, call: PlayerCall) {
        if self.calls.len() >= MAX_RECORDED_CALLS {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    fn position(&self, now_ms: u64) -> f64 {
        let position = if self.playing {
            self.base_position + now_ms.saturating_sub(self.anchor_ms) as f64 / 1000.0
        } else {
            self.base_position
        };
        position.min(self.duration)
    }

    /// Re-anchor at `now_ms`, stopping if the end was reached
    fn settle(&mut self, now_ms: u64) {
        self.base_position = self.position(now_ms);
        self.anchor_ms = now_ms;
        if self.playing && self.base_position >= self.duration {
            self.playing = false;
        }
    }

    fn status(&self, now_ms: u64) -> PlayerStatus {
        if self.item.is_none() {
            return PlayerStatus::Unstarted;
        }
        if self.position(now_ms) >= self.duration {
            PlayerStatus::Ended
        } else if self.playing {
            PlayerStatus::Playing
        } else {
            PlayerStatus::Paused
        }
    }
}

/// In-process player with a clock-driven playhead
pub struct MemoryPlayer {
    clock: SharedClock,
    state: Mutex<SimState>,
}

impl MemoryPlayer {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: Mutex::new(SimState {
                item: None,
                playing: false,
                base_position: 0.0,
                anchor_ms: 0,
                duration: DEFAULT_DURATION_SECS,
                ready: true,
                calls: VecDeque::with_capacity(MAX_RECORDED_CALLS),
            }),
        }
    }

    /// When not ready, transport calls and position reads fail with
    /// [`PlayerError::NotReady`], as a real player does mid-load
    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    /// Duration of the loaded item (reset to the default on every load)
    pub fn set_duration(&self, duration: f64) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.settle(now);
        state.duration = duration;
    }

    /// Shift the playhead without recording a call (simulates local drift)
    pub fn nudge(&self, delta_secs: f64) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.settle(now);
        state.base_position = (state.base_position + delta_secs).clamp(0.0, state.duration);
    }

    /// Jump to the end of the loaded item
    pub fn finish(&self) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.base_position = state.duration;
        state.anchor_ms = now;
        state.playing = false;
    }

    /// Recent control calls, oldest first (the last [`MAX_RECORDED_CALLS`])
    pub fn calls(&self) -> Vec<PlayerCall> {
        self.state.lock().calls.iter().cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Playhead right now, ignoring readiness
    pub fn position(&self) -> f64 {
        let now = self.clock.now_ms();
        self.state.lock().position(now)
    }

    pub fn is_playing(&self) -> bool {
        let now = self.clock.now_ms();
        self.state.lock().status(now) == PlayerStatus::Playing
    }

    pub fn loaded_item(&self) -> Option<String> {
        self.state.lock().item.clone()
    }

    fn ready(&self) -> PlayerResult<()> {
        if self.state.lock().ready {
            Ok(())
        } else {
            Err(PlayerError::NotReady)
        }
    }
}

#[async_trait]
impl PlayerAdapter for MemoryPlayer {
    async fn load_item(&self, item_id: &str) -> PlayerResult<()> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        debug!("Simulated player loading {}", item_id);
        state.item = Some(item_id.to_string());
        state.playing = false;
        state.base_position = 0.0;
        state.anchor_ms = now;
        state.duration = DEFAULT_DURATION_SECS;
        state.record(PlayerCall::Load(item_id.to_string()));
        Ok(())
    }

    async fn play(&self) -> PlayerResult<()> {
        self.ready()?;
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.settle(now);
        if state.base_position < state.duration {
            state.playing = true;
        }
        state.record(PlayerCall::Play);
        Ok(())
    }

    async fn pause(&self) -> PlayerResult<()> {
        self.ready()?;
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.settle(now);
        state.playing = false;
        state.record(PlayerCall::Pause);
        Ok(())
    }

    async fn seek(&self, position: f64) -> PlayerResult<()> {
        self.ready()?;
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.settle(now);
        state.base_position = position.clamp(0.0, state.duration);
        state.record(PlayerCall::Seek(position));
        Ok(())
    }

    async fn current_time(&self) -> PlayerResult<f64> {
        self.ready()?;
        Ok(self.position())
    }

    async fn status(&self) -> PlayerResult<PlayerStatus> {
        let now = self.clock.now_ms();
        Ok(self.state.lock().status(now))
    }

    async fn current_item(&self) -> PlayerResult<Option<String>> {
        Ok(self.loaded_item())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn player() -> (Arc<ManualClock>, MemoryPlayer) {
        let clock = Arc::new(ManualClock::new(10_000));
        let player = MemoryPlayer::new(clock.clone());
        (clock, player)
    }

    #[tokio::test]
    async fn test_call_record_is_bounded() {
        let (_clock, player) = player();
        player.load_item("X").await.unwrap();
        for i in 0..(MAX_RECORDED_CALLS * 2) {
            player.seek(i as f64).await.unwrap();
        }

        let calls = player.calls();
        assert_eq!(calls.len(), MAX_RECORDED_CALLS);
        assert_eq!(calls[0], PlayerCall::Seek(MAX_RECORDED_CALLS as f64));
        assert_eq!(
            calls.last(),
            Some(&PlayerCall::Seek((MAX_RECORDED_CALLS * 2 - 1) as f64))
        );
    }

    #[tokio::test]
    async fn test_playhead_follows_clock() {
        let (clock, player) = player();
        assert_eq!(player.status().await.unwrap(), PlayerStatus::Unstarted);

        player.load_item("A").await.unwrap();
        assert_eq!(player.status().await.unwrap(), PlayerStatus::Paused);

        player.play().await.unwrap();
        clock.advance(2_500);
        assert_eq!(player.current_time().await.unwrap(), 2.5);

        player.pause().await.unwrap();
        clock.advance(5_000);
        assert_eq!(player.current_time().await.unwrap(), 2.5);
        assert_eq!(
            player.calls(),
            vec![PlayerCall::Load("A".into()), PlayerCall::Play, PlayerCall::Pause]
        );
    }

    #[tokio::test]
    async fn test_ends_at_duration() {
        let (clock, player) = player();
        player.load_item("A").await.unwrap();
        player.set_duration(10.0);
        player.play().await.unwrap();
        clock.advance(12_000);

        assert_eq!(player.status().await.unwrap(), PlayerStatus::Ended);
        assert_eq!(player.current_time().await.unwrap(), 10.0);

        // Seeking back leaves it paused mid-item
        player.seek(3.0).await.unwrap();
        assert_eq!(player.status().await.unwrap(), PlayerStatus::Paused);
    }

    #[tokio::test]
    async fn test_not_ready() {
        let (_, player) = player();
        player.load_item("A").await.unwrap();
        player.set_ready(false);

        assert!(matches!(player.play().await, Err(PlayerError::NotReady)));
        assert!(matches!(player.current_time().await, Err(PlayerError::NotReady)));
        // Status stays readable
        assert_eq!(player.status().await.unwrap(), PlayerStatus::Paused);

        player.set_ready(true);
        assert!(player.play().await.is_ok());
    }

    #[tokio::test]
    async fn test_finish_and_nudge() {
        let (_, player) = player();
        player.load_item("A").await.unwrap();
        player.nudge(4.0);
        assert_eq!(player.position(), 4.0);

        player.finish();
        assert_eq!(player.status().await.unwrap(), PlayerStatus::Ended);
    }
}
