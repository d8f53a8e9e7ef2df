//! REST JSON tree store
//!
//! Talks to a Firebase-style realtime database over its REST API. Rooms live
//! at `rooms/{room}` and their queues at `rooms/{room}/queue`. Subscriptions
//! poll and emit whenever the fetched value differs from the last one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace};

use super::{QueueWatch, RoomWatch, SharedStore, StoreError, StoreResult};
use crate::sync::{sort_fifo, QueueEntry, QueueEntryRecord, RoomPatch, RoomState};

/// Default interval between subscription polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Response to a push (POST)
#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// Client for a REST JSON tree
#[derive(Debug, Clone)]
pub struct RestStore {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
    poll_interval: Duration,
}

impl RestStore {
    /// Create a store client for a database root such as
    /// `https://my-project.firebaseio.com`
    pub fn new(base_url: impl Into<String>) -> StoreResult<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set the auth token sent with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set how often subscriptions poll
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn room_path(room_id: &str) -> String {
        format!("rooms/{}", room_id)
    }

    fn queue_path(room_id: &str) -> String {
        format!("rooms/{}/queue", room_id)
    }

    fn entry_path(room_id: &str, entry_id: &str) -> String {
        format!("rooms/{}/queue/{}", room_id, entry_id)
    }

    /// Build a request for a path in the tree
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}.json", self.base_url, path);
        let mut req = self.http.request(method, &url);

        if let Some(token) = &self.auth_token {
            req = req.query(&[("auth", token)]);
        }

        req
    }

    /// GET a path; JSON `null` means absent
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        let resp = self.request(Method::GET, path).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice::<Option<T>>(&body)?)
    }

    fn check(status: StatusCode) -> StoreResult<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::Status(status.as_u16()))
        }
    }

    async fn read_room(&self, room_id: &str) -> StoreResult<Option<RoomState>> {
        self.get_json(&Self::room_path(room_id)).await
    }

    async fn read_queue(&self, room_id: &str) -> StoreResult<Vec<QueueEntry>> {
        let map: Option<HashMap<String, QueueEntryRecord>> =
            self.get_json(&Self::queue_path(room_id)).await?;
        let mut entries: Vec<QueueEntry> = map
            .unwrap_or_default()
            .into_iter()
            .map(|(id, record)| QueueEntry::from_record(id, record))
            .collect();
        sort_fifo(&mut entries);
        Ok(entries)
    }
}

/// Poll with `fetch` until every receiver is gone, publishing changes
fn spawn_poller<T, F, Fut>(tx: watch::Sender<T>, interval: Duration, label: String, fetch: F)
where
    T: PartialEq + Send + Sync + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = StoreResult<T>> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("Stopped polling {}", label);
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            match fetch().await {
                Ok(value) => {
                    tx.send_if_modified(|current| {
                        if *current == value {
                            false
                        } else {
                            *current = value;
                            true
                        }
                    });
                }
                // Next poll retries
                Err(e) => debug!("Poll of {} failed: {}", label, e),
            }
        }
    });
}

#[async_trait]
impl SharedStore for RestStore {
    #[instrument(skip(self, state))]
    async fn set_room(&self, room_id: &str, state: &RoomState) -> StoreResult<()> {
        let resp = self
            .request(Method::PUT, &Self::room_path(room_id))
            .json(state)
            .send()
            .await?;
        Self::check(resp.status())?;
        info!("Wrote room {}", room_id);
        Ok(())
    }

    async fn update_room(&self, room_id: &str, patch: &RoomPatch) -> StoreResult<()> {
        let resp = self
            .request(Method::PATCH, &Self::room_path(room_id))
            .json(patch)
            .send()
            .await?;
        Self::check(resp.status())?;
        trace!("Patched room {}", room_id);
        Ok(())
    }

    async fn fetch_room(&self, room_id: &str) -> StoreResult<Option<RoomState>> {
        self.read_room(room_id).await
    }

    async fn subscribe_room(&self, room_id: &str) -> StoreResult<RoomWatch> {
        let initial = self.read_room(room_id).await?;
        let (tx, rx) = watch::channel(initial);

        let store = self.clone();
        let id = room_id.to_string();
        spawn_poller(tx, self.poll_interval, Self::room_path(room_id), move || {
            let store = store.clone();
            let id = id.clone();
            async move { store.read_room(&id).await }
        });

        Ok(rx)
    }

    async fn push_queue(&self, room_id: &str, entry: &QueueEntryRecord) -> StoreResult<String> {
        let resp = self
            .request(Method::POST, &Self::queue_path(room_id))
            .json(entry)
            .send()
            .await?;
        Self::check(resp.status())?;
        let pushed: PushResponse = resp.json().await?;
        debug!("Queued {} as {}", entry.item_id, pushed.name);
        Ok(pushed.name)
    }

    /// Conditional delete: read the entry's ETag, then delete only if it
    /// still matches. A concurrent remover leaves us with a 412.
    async fn remove_queue(&self, room_id: &str, entry_id: &str) -> StoreResult<bool> {
        let path = Self::entry_path(room_id, entry_id);

        let resp = self
            .request(Method::GET, &path)
            .header("X-Firebase-ETag", "true")
            .send()
            .await?;
        Self::check(resp.status())?;
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: serde_json::Value = resp.json().await?;
        if body.is_null() {
            return Ok(false);
        }
        let Some(etag) = etag else {
            return Err(StoreError::Status(StatusCode::PRECONDITION_REQUIRED.as_u16()));
        };

        let resp = self
            .request(Method::DELETE, &path)
            .header(reqwest::header::IF_MATCH, etag)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::PRECONDITION_FAILED => {
                debug!("Entry {} was claimed by someone else", entry_id);
                Ok(false)
            }
            status => Err(StoreError::Status(status.as_u16())),
        }
    }

    async fn clear_queue(&self, room_id: &str) -> StoreResult<()> {
        let resp = self
            .request(Method::DELETE, &Self::queue_path(room_id))
            .send()
            .await?;
        Self::check(resp.status())
    }

    async fn fetch_queue(&self, room_id: &str) -> StoreResult<Vec<QueueEntry>> {
        self.read_queue(room_id).await
    }

    async fn subscribe_queue(&self, room_id: &str) -> StoreResult<QueueWatch> {
        let initial = self.read_queue(room_id).await?;
        let (tx, rx) = watch::channel(initial);

        let store = self.clone();
        let id = room_id.to_string();
        spawn_poller(tx, self.poll_interval, Self::queue_path(room_id), move || {
            let store = store.clone();
            let id = id.clone();
            async move { store.read_queue(&id).await }
        });

        Ok(rx)
    }
}
