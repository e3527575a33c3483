//! JSON-RPC client for the Transmission daemon.

use super::{RpcEndpoint, TorrentEngine, TorrentId, TorrentStatus, TransmissionError};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Header used by Transmission for CSRF protection
const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    arguments: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct TorrentAddArguments {
    #[serde(rename = "torrent-added")]
    added: Option<AddedTorrent>,
    #[serde(rename = "torrent-duplicate")]
    duplicate: Option<AddedTorrent>,
}

#[derive(Deserialize)]
struct AddedTorrent {
    id: TorrentId,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct TorrentGetArguments {
    #[serde(default)]
    torrents: Vec<TorrentFields>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TorrentFields {
    percent_done: Option<f64>,
    is_finished: Option<bool>,
}

#[derive(Deserialize)]
struct SessionArguments {
    #[serde(default)]
    version: String,
}

/// Transmission RPC client
pub struct TransmissionClient {
    http: HttpClient,
    endpoint: RpcEndpoint,
    user: Option<String>,
    password: String,
    session_id: RwLock<Option<String>>,
}

impl TransmissionClient {
    /// Create a client for `raw_url`, authenticating with `user`/`password`
    /// when a user is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        raw_url: &str,
        user: &str,
        password: &str,
        http_timeout: Duration,
    ) -> Result<Self, TransmissionError> {
        let endpoint = RpcEndpoint::parse(raw_url)?;
        let http = HttpClient::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| TransmissionError::Http(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            user: (!user.is_empty()).then(|| user.to_string()),
            password: password.to_string(),
            session_id: RwLock::new(None),
        })
    }

    /// The resolved RPC endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    /// Verify connectivity and credentials, returning the daemon version.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or rejects the request.
    pub async fn check_connection(&self) -> Result<String, TransmissionError> {
        let arguments = self.call("session-get", json!({ "fields": ["version"] })).await?;
        let session: SessionArguments = serde_json::from_value(arguments)
            .map_err(|e| TransmissionError::Protocol(e.to_string()))?;
        info!(
            endpoint = %self.endpoint.url(),
            tls = self.endpoint.is_https(),
            version = %session.version,
            "Connected to Transmission"
        );
        if self.user.is_some() && !self.endpoint.is_https() {
            warn!("RPC credentials are sent over plain HTTP");
        }
        Ok(session.version)
    }

    async fn add(&self, arguments: Value) -> Result<TorrentId, TransmissionError> {
        let arguments = self.call("torrent-add", arguments).await?;
        let parsed: TorrentAddArguments = serde_json::from_value(arguments)
            .map_err(|e| TransmissionError::Protocol(e.to_string()))?;

        match (parsed.added, parsed.duplicate) {
            (Some(t), _) => {
                debug!(id = t.id, name = %t.name, "Torrent added");
                Ok(t.id)
            }
            (None, Some(t)) => {
                debug!(id = t.id, name = %t.name, "Torrent already present");
                Ok(t.id)
            }
            (None, None) => Err(TransmissionError::Protocol(
                "torrent-add returned no torrent".to_string(),
            )),
        }
    }

    /// Perform one RPC call.
    ///
    /// A `409 Conflict` answer carries a fresh session id; the request is
    /// re-sent once with it, which is the normal Transmission handshake.
    async fn call(&self, method: &str, arguments: Value) -> Result<Value, TransmissionError> {
        let body = RpcRequest { method, arguments };

        for _ in 0..2 {
            let mut req = self.http.post(self.endpoint.url().clone()).json(&body);
            if let Some(user) = &self.user {
                req = req.basic_auth(user, Some(&self.password));
            }
            if let Some(session_id) = self.session_id.read().await.as_deref() {
                req = req.header(SESSION_ID_HEADER, session_id);
            }

            let response = req
                .send()
                .await
                .map_err(|e| TransmissionError::Http(e.without_url().to_string()))?;

            let status = response.status();
            if status == StatusCode::CONFLICT {
                let session_id = response
                    .headers()
                    .get(SESSION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        TransmissionError::Protocol("409 without session id".to_string())
                    })?;
                debug!("Transmission session id renewed");
                *self.session_id.write().await = Some(session_id);
                continue;
            }
            if status == StatusCode::UNAUTHORIZED {
                return Err(TransmissionError::Http(
                    "401 Unauthorized: check RPC user and password".to_string(),
                ));
            }
            if !status.is_success() {
                return Err(TransmissionError::Http(format!("unexpected status {status}")));
            }

            let reply: RpcResponse = response
                .json()
                .await
                .map_err(|e| TransmissionError::Protocol(e.to_string()))?;
            if reply.result != "success" {
                return Err(TransmissionError::Rpc(reply.result));
            }
            return Ok(reply.arguments);
        }

        Err(TransmissionError::Protocol(
            "session id negotiation failed".to_string(),
        ))
    }
}

#[async_trait]
impl TorrentEngine for TransmissionClient {
    async fn add_magnet(
        &self,
        magnet: &str,
        download_dir: &str,
    ) -> Result<TorrentId, TransmissionError> {
        self.add(json!({ "filename": magnet, "download-dir": download_dir }))
            .await
    }

    async fn add_torrent_file(
        &self,
        raw: Vec<u8>,
        download_dir: &str,
    ) -> Result<TorrentId, TransmissionError> {
        let metainfo = base64::engine::general_purpose::STANDARD.encode(raw);
        self.add(json!({ "metainfo": metainfo, "download-dir": download_dir }))
            .await
    }

    async fn torrent_status(&self, id: TorrentId) -> Result<TorrentStatus, TransmissionError> {
        let arguments = self
            .call(
                "torrent-get",
                json!({ "ids": [id], "fields": ["id", "percentDone", "isFinished"] }),
            )
            .await?;
        let parsed: TorrentGetArguments = serde_json::from_value(arguments)
            .map_err(|e| TransmissionError::Protocol(e.to_string()))?;

        let fields = parsed
            .torrents
            .into_iter()
            .next()
            .ok_or(TransmissionError::NotFound(id))?;

        Ok(TorrentStatus {
            is_finished: fields.is_finished.unwrap_or(false),
            percent_done: fields.percent_done.unwrap_or(0.0),
        })
    }
}
