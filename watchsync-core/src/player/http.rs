//! Player driven over a local HTTP API (Cider-compatible)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::{debug, instrument};

use super::types::*;
use super::{PlayerAdapter, PlayerError, PlayerResult, PlayerStatus};

/// Default player API port
pub const DEFAULT_PORT: u16 = 10767;

/// Item type sent with play-item requests
pub const DEFAULT_ITEM_TYPE: &str = "songs";

/// Remaining time (seconds) at or below which a paused item counts as ended
const ENDED_REMAINING_SECS: f64 = 0.5;

/// Default connection timeout (short since it's localhost)
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Default request timeout (short since it's localhost)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for a local player's REST API
#[derive(Debug, Clone)]
pub struct HttpPlayer {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    item_type: String,
}

impl HttpPlayer {
    /// Create a client for the default port on localhost
    pub fn try_new() -> PlayerResult<Self> {
        Self::with_port(DEFAULT_PORT)
    }

    /// Create a client for a custom port on localhost
    pub fn with_port(port: u16) -> PlayerResult<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            // Limit connection pool to avoid stale connections
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            // Use 127.0.0.1 explicitly to avoid IPv6 issues
            base_url: format!("http://127.0.0.1:{}", port),
            api_token: None,
            item_type: DEFAULT_ITEM_TYPE.to_string(),
        })
    }

    /// Set the API token for authentication
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set the item type used when loading items
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    /// Build a request with optional authentication
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1/playback{}", self.base_url, path);
        let mut req = self.http.request(method, &url);

        if let Some(token) = &self.api_token {
            req = req.header("apitoken", token);
        }

        req
    }

    /// Send a request and map transport and status failures
    async fn send(&self, req: RequestBuilder) -> PlayerResult<Response> {
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                debug!("Player not reachable: {}", e);
                PlayerError::NotReachable
            } else {
                PlayerError::Http(e)
            }
        })?;

        match resp.status().as_u16() {
            401 | 403 => Err(PlayerError::Unauthorized),
            code if !resp.status().is_success() => {
                Err(PlayerError::Api(format!("Unexpected response (HTTP {})", code)))
            }
            _ => Ok(resp),
        }
    }

    async fn post(&self, path: &str) -> PlayerResult<()> {
        self.send(self.request(Method::POST, path)).await?;
        Ok(())
    }

    /// Check if the player is active and reachable
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn is_active(&self) -> PlayerResult<()> {
        debug!("Checking player connection");
        self.send(self.request(Method::GET, "/active")).await?;
        Ok(())
    }

    pub async fn is_playing(&self) -> PlayerResult<bool> {
        let resp: ApiResponse<IsPlayingResponse> = self
            .send(self.request(Method::GET, "/is-playing"))
            .await?
            .json()
            .await?;
        Ok(resp.data.is_playing)
    }

    /// Get the loaded item (None when nothing is loaded)
    pub async fn now_playing(&self) -> PlayerResult<Option<NowPlaying>> {
        let resp = self.send(self.request(Method::GET, "/now-playing")).await;
        let resp = match resp {
            Ok(resp) if resp.status() == 204 => return Ok(None),
            Ok(resp) => resp,
            Err(PlayerError::Api(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        // Some player builds answer with an empty object when idle
        match resp.json::<ApiResponse<NowPlayingResponse>>().await {
            Ok(data) => Ok(Some(data.data.info)),
            Err(_) => Ok(None),
        }
    }
}

/// Status from the is-playing flag and the now-playing record
fn derive_status(is_playing: bool, now_playing: Option<&NowPlaying>) -> PlayerStatus {
    let Some(info) = now_playing else {
        return PlayerStatus::Unstarted;
    };
    if is_playing {
        PlayerStatus::Playing
    } else if info.duration_in_millis > 0 && info.remaining_time <= ENDED_REMAINING_SECS {
        PlayerStatus::Ended
    } else {
        PlayerStatus::Paused
    }
}

#[async_trait]
impl PlayerAdapter for HttpPlayer {
    async fn load_item(&self, item_id: &str) -> PlayerResult<()> {
        debug!("Loading {} {}", self.item_type, item_id);
        self.send(self.request(Method::POST, "/play-item").json(&PlayItemRequest {
            item_type: self.item_type.clone(),
            id: item_id.to_string(),
        }))
        .await?;
        Ok(())
    }

    async fn play(&self) -> PlayerResult<()> {
        self.post("/play").await
    }

    async fn pause(&self) -> PlayerResult<()> {
        self.post("/pause").await
    }

    async fn seek(&self, position: f64) -> PlayerResult<()> {
        self.send(self.request(Method::POST, "/seek").json(&SeekRequest {
            position: position.max(0.0),
        }))
        .await?;
        Ok(())
    }

    async fn current_time(&self) -> PlayerResult<f64> {
        match self.now_playing().await? {
            Some(info) => Ok(info.current_playback_time),
            None => Err(PlayerError::NotReady),
        }
    }

    async fn status(&self) -> PlayerResult<PlayerStatus> {
        let now_playing = self.now_playing().await?;
        let is_playing = match now_playing {
            Some(_) => self.is_playing().await?,
            None => false,
        };
        Ok(derive_status(is_playing, now_playing.as_ref()))
    }

    async fn current_item(&self) -> PlayerResult<Option<String>> {
        Ok(self
            .now_playing()
            .await?
            .and_then(|info| info.item_id().map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now_playing(remaining: f64) -> NowPlaying {
        NowPlaying {
            play_params: Some(PlayParams {
                id: "1".into(),
                kind: "song".into(),
            }),
            name: "t".into(),
            duration_in_millis: 180_000,
            current_playback_time: 180.0 - remaining,
            remaining_time: remaining,
        }
    }

    #[test]
    fn test_client_creation() {
        let player = HttpPlayer::try_new().unwrap();
        assert_eq!(player.base_url, "http://127.0.0.1:10767");
        assert_eq!(player.item_type, "songs");

        let player = HttpPlayer::with_port(9000).unwrap().with_token("test-token");
        assert_eq!(player.base_url, "http://127.0.0.1:9000");
        assert_eq!(player.api_token, Some("test-token".to_string()));
    }

    #[test]
    fn test_derive_status() {
        assert_eq!(derive_status(false, None), PlayerStatus::Unstarted);
        assert_eq!(derive_status(true, Some(&now_playing(50.0))), PlayerStatus::Playing);
        assert_eq!(derive_status(false, Some(&now_playing(50.0))), PlayerStatus::Paused);
        assert_eq!(derive_status(false, Some(&now_playing(0.2))), PlayerStatus::Ended);
    }
}
