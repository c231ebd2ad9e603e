//! Remote save/load boundary.
//!
//! [`RemoteSync`] is what the scheduler and facade talk to; [`HttpRemoteClient`]
//! implements it against the game server's JSON endpoints.

use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use minesync_types::{GameStateDocument, SaveReason, UserId};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const SAVE_PATH: &str = "/api/game/save-progress";
const LOAD_PATH: &str = "/api/game/load-progress";

/// Per-push flags sent alongside the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    pub reason: SaveReason,
    pub critical: bool,
}

/// Server acknowledgement of a save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// The server queued the save into a batch rather than writing it inline.
    pub batched: bool,
    pub batch_id: Option<String>,
    pub total_requests: Option<u64>,
}

/// Remote persistence used by the sync engine.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Sends `doc` to the server.
    async fn push(&self, doc: &GameStateDocument, options: &PushOptions) -> RemoteResult<Ack>;

    /// Fetches the stored document for `user`, or `None` if the server has none.
    async fn pull(&self, user: &UserId) -> RemoteResult<Option<GameStateDocument>>;

    /// Fire-and-forget send used while the process is going away. Must not
    /// block and has no observable result.
    fn push_unload(&self, doc: &GameStateDocument);
}

/// How requests identify the player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Identity {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `X-Farcaster-User: <fid>`.
    FarcasterUser(String),
    /// Identity travels in the body only.
    #[default]
    Anonymous,
}

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRemoteConfig {
    /// Server origin, e.g. `https://game.example.com`.
    pub base_url: String,
    pub identity: Identity,
    /// Deadline for a whole push or pull exchange.
    pub request_timeout_ms: u64,
    /// Deadline for the unload-time send.
    pub unload_timeout_ms: u64,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            identity: Identity::default(),
            request_timeout_ms: 10_000,
            unload_timeout_ms: 2_000,
        }
    }
}

impl HttpRemoteConfig {
    /// Defaults overridden by `SAVE_REQUEST_TIMEOUT`.
    pub fn from_env(base_url: impl Into<String>) -> Self {
        let mut config = Self {
            base_url: base_url.into(),
            ..Self::default()
        };
        if let Some(v) = minesync_storage::env_parse("SAVE_REQUEST_TIMEOUT") {
            config.request_timeout_ms = v;
        }
        config
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest<'a> {
    game_state: &'a GameStateDocument,
    fid: &'a UserId,
    is_critical: bool,
    reason: SaveReason,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SaveResponse {
    success: bool,
    error: Option<String>,
    is_batched: bool,
    batch_id: Option<String>,
    total_requests: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoadResponse {
    success: bool,
    error: Option<String>,
    data: Option<LoadData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LoadData {
    game_state: Option<Value>,
}

/// [`RemoteSync`] over the game server's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    config: HttpRemoteConfig,
    client: Client,
}

impl HttpRemoteClient {
    pub fn new(config: HttpRemoteConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpRemoteConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.identity {
            Identity::Bearer(token) => request.bearer_auth(token),
            Identity::FarcasterUser(fid) => request.header("X-Farcaster-User", fid),
            Identity::Anonymous => request,
        }
    }

    fn save_request(&self, doc: &GameStateDocument, options: &PushOptions) -> RequestBuilder {
        let body = SaveRequest {
            game_state: doc,
            fid: &doc.user_id,
            is_critical: options.critical,
            reason: options.reason,
        };
        self.authorize(self.client.post(self.url(SAVE_PATH)).json(&body))
    }

    async fn send_save(&self, request: RequestBuilder) -> RemoteResult<Ack> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(format!("save request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::TooManyRequests {
                retry_after: retry_after(&response),
            });
        }

        let text = response.text().await.unwrap_or_default();
        let body: SaveResponse = serde_json::from_str(&text).unwrap_or_default();

        if let Some(code) = body.error.as_deref() {
            if let Some(throttled) = RemoteError::from_code(code) {
                debug!("Save throttled by server: {}", code);
                return Err(throttled);
            }
        }

        if !status.is_success() {
            return Err(RemoteError::Server {
                status: status.as_u16(),
                message: body.error.unwrap_or(text),
            });
        }

        if body.is_batched {
            debug!(
                "Save batched as {:?} ({:?} queued)",
                body.batch_id, body.total_requests
            );
        } else if !body.success {
            return Err(RemoteError::Rejected(
                body.error.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }

        Ok(Ack {
            batched: body.is_batched,
            batch_id: body.batch_id,
            total_requests: body.total_requests,
        })
    }

    async fn send_load(&self, user: &UserId) -> RemoteResult<Option<GameStateDocument>> {
        let request = self
            .client
            .get(self.url(LOAD_PATH))
            .query(&[("fid", user.as_str())]);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Network(format!("load request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::TooManyRequests {
                retry_after: retry_after(&response),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body: LoadResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(format!("failed to parse load response: {e}")))?;
        if !body.success {
            debug!("Server has no state for {}: {:?}", user, body.error);
            return Ok(None);
        }

        match body.data.and_then(|d| d.game_state) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => GameStateDocument::from_value(value)
                .map(Some)
                .map_err(|e| RemoteError::Decode(e.to_string())),
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl RemoteSync for HttpRemoteClient {
    async fn push(&self, doc: &GameStateDocument, options: &PushOptions) -> RemoteResult<Ack> {
        let deadline = Duration::from_millis(self.config.request_timeout_ms);
        debug!(
            "Pushing {} v{} ({})",
            doc.user_id, doc.version, options.reason
        );
        // Dropping the future on expiry aborts the in-flight request.
        match tokio::time::timeout(deadline, self.send_save(self.save_request(doc, options))).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("Save for {} timed out after {:?}", doc.user_id, deadline);
                Err(RemoteError::Timeout)
            }
        }
    }

    async fn pull(&self, user: &UserId) -> RemoteResult<Option<GameStateDocument>> {
        let deadline = Duration::from_millis(self.config.request_timeout_ms);
        match tokio::time::timeout(deadline, self.send_load(user)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Load for {} timed out after {:?}", user, deadline);
                Err(RemoteError::Timeout)
            }
        }
    }

    fn push_unload(&self, doc: &GameStateDocument) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available for unload send of {}", doc.user_id);
            return;
        };
        let options = PushOptions {
            reason: SaveReason::BeforeUnload,
            critical: true,
        };
        let request = self.save_request(doc, &options);
        let client = self.clone();
        let deadline = Duration::from_millis(self.config.unload_timeout_ms);
        let user = doc.user_id.clone();
        handle.spawn(async move {
            match tokio::time::timeout(deadline, client.send_save(request)).await {
                Ok(Ok(_)) => info!("Unload save delivered for {}", user),
                Ok(Err(e)) => debug!("Unload save for {} failed: {}", user, e),
                Err(_) => debug!("Unload save for {} timed out", user),
            }
        });
    }
}
