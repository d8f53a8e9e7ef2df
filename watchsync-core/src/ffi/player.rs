//! Native player bridge
//!
//! Lets the host app drive its own player (an embedded web player, a system
//! media session) through the same adapter the sync engine uses.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::PlaybackStatus;
use crate::player::{PlayerAdapter, PlayerError, PlayerResult, PlayerStatus};

/// Player implemented by the host app
#[uniffi::export(callback_interface)]
pub trait NativePlayer: Send + Sync {
    /// False while the player is loading or not yet created
    fn is_ready(&self) -> bool;
    fn load_item(&self, item_id: String);
    fn play(&self);
    fn pause(&self);
    fn seek(&self, position: f64);
    fn current_time(&self) -> f64;
    fn status(&self) -> PlaybackStatus;
    fn current_item(&self) -> Option<String>;
}

/// Adapter over a [`NativePlayer`]
pub(crate) struct ForeignPlayer {
    inner: Arc<dyn NativePlayer>,
}

impl ForeignPlayer {
    pub(crate) fn new(inner: Arc<dyn NativePlayer>) -> Self {
        Self { inner }
    }

    fn ready(&self) -> PlayerResult<()> {
        if self.inner.is_ready() {
            Ok(())
        } else {
            Err(PlayerError::NotReady)
        }
    }
}

#[async_trait]
impl PlayerAdapter for ForeignPlayer {
    async fn load_item(&self, item_id: &str) -> PlayerResult<()> {
        self.inner.load_item(item_id.to_string());
        Ok(())
    }

    async fn play(&self) -> PlayerResult<()> {
        self.ready()?;
        self.inner.play();
        Ok(())
    }

    async fn pause(&self) -> PlayerResult<()> {
        self.ready()?;
        self.inner.pause();
        Ok(())
    }

    async fn seek(&self, position: f64) -> PlayerResult<()> {
        self.ready()?;
        self.inner.seek(position);
        Ok(())
    }

    async fn current_time(&self) -> PlayerResult<f64> {
        self.ready()?;
        Ok(self.inner.current_time())
    }

    async fn status(&self) -> PlayerResult<PlayerStatus> {
        Ok(self.inner.status().into())
    }

    async fn current_item(&self) -> PlayerResult<Option<String>> {
        Ok(self.inner.current_item())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakePlayer {
        ready: bool,
        log: Mutex<Vec<String>>,
    }

    impl NativePlayer for FakePlayer {
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn load_item(&self, item_id: String) {
            self.log.lock().push(format!("load {}", item_id));
        }
        fn play(&self) {
            self.log.lock().push("play".into());
        }
        fn pause(&self) {
            self.log.lock().push("pause".into());
        }
        fn seek(&self, position: f64) {
            self.log.lock().push(format!("seek {}", position));
        }
        fn current_time(&self) -> f64 {
            1.5
        }
        fn status(&self) -> PlaybackStatus {
            PlaybackStatus::Buffering
        }
        fn current_item(&self) -> Option<String> {
            Some("X".into())
        }
    }

    #[tokio::test]
    async fn test_not_ready_player_refuses_transport() {
        let native = Arc::new(FakePlayer::default());
        let player = ForeignPlayer::new(native.clone());

        assert!(player.load_item("A").await.is_ok());
        assert!(matches!(player.play().await, Err(PlayerError::NotReady)));
        assert!(matches!(player.current_time().await, Err(PlayerError::NotReady)));
        assert_eq!(player.status().await.unwrap(), PlayerStatus::Buffering);
        assert_eq!(*native.log.lock(), vec!["load A".to_string()]);
    }

    #[tokio::test]
    async fn test_ready_player_forwards_calls() {
        let native = Arc::new(FakePlayer {
            ready: true,
            ..Default::default()
        });
        let player = ForeignPlayer::new(native.clone());

        player.seek(4.0).await.unwrap();
        player.pause().await.unwrap();
        assert_eq!(player.current_time().await.unwrap(), 1.5);
        assert_eq!(player.current_item().await.unwrap().as_deref(), Some("X"));
        assert_eq!(*native.log.lock(), vec!["seek 4".to_string(), "pause".to_string()]);
    }
}
