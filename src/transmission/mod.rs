//! Remote download engine (Transmission)
//!
//! Defines the narrow engine contract used by the bot and a JSON-RPC
//! client implementing it.

mod client;
mod endpoint;

pub use client::TransmissionClient;
pub use endpoint::RpcEndpoint;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Identifier assigned to a torrent by the remote engine
pub type TorrentId = i64;

/// Errors that can occur while talking to the remote engine
#[derive(Debug, Error)]
pub enum TransmissionError {
    /// Network or HTTP-level failure
    #[error("HTTP error: {0}")]
    Http(String),
    /// The engine answered with a non-success result string
    #[error("{0}")]
    Rpc(String),
    /// The engine does not know the requested torrent
    #[error("torrent {0} not found")]
    NotFound(TorrentId),
    /// Unexpected or malformed response
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The RPC endpoint URL could not be parsed
    #[error("invalid RPC endpoint: {0}")]
    InvalidEndpoint(String),
    /// The call did not finish within its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The call was abandoned because of shutdown
    #[error("request cancelled")]
    Cancelled,
}

/// Completion state of a single torrent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorrentStatus {
    /// Engine reports the torrent as finished (seeding limits reached etc.)
    pub is_finished: bool,
    /// Fraction of wanted data downloaded, `0.0..=1.0`
    pub percent_done: f64,
}

impl TorrentStatus {
    /// Fraction at which a torrent counts as downloaded even if not finished.
    pub const COMPLETE_THRESHOLD: f64 = 0.999;

    /// Whether the torrent should be reported as completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_finished || self.percent_done >= Self::COMPLETE_THRESHOLD
    }
}

/// Interface of the remote download engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Add a torrent from a magnet-style descriptor into `download_dir`.
    async fn add_magnet(
        &self,
        magnet: &str,
        download_dir: &str,
    ) -> Result<TorrentId, TransmissionError>;

    /// Add a torrent from raw `.torrent` file contents into `download_dir`.
    async fn add_torrent_file(
        &self,
        raw: Vec<u8>,
        download_dir: &str,
    ) -> Result<TorrentId, TransmissionError>;

    /// Query the completion state of a torrent.
    async fn torrent_status(&self, id: TorrentId) -> Result<TorrentStatus, TransmissionError>;
}

/// Run an engine call under a deadline and the shared shutdown token.
///
/// # Errors
///
/// Returns [`TransmissionError::Cancelled`] if `cancel` fires first,
/// [`TransmissionError::Timeout`] if `limit` elapses, otherwise the call's own result.
pub async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    call: F,
) -> Result<T, TransmissionError>
where
    F: Future<Output = Result<T, TransmissionError>>,
{
    if cancel.is_cancelled() {
        return Err(TransmissionError::Cancelled);
    }
    tokio::select! {
        () = cancel.cancelled() => Err(TransmissionError::Cancelled),
        res = tokio::time::timeout(limit, call) => {
            res.unwrap_or(Err(TransmissionError::Timeout(limit)))
        }
    }
}
