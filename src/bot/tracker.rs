//! Tracking of accepted downloads until the engine reports completion.

use crate::transmission::{TorrentId, TransmissionError};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Chat message a download originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Telegram chat id
    pub chat_id: i64,
    /// Telegram message id inside the chat
    pub message_id: i32,
}

impl Origin {
    /// Create an origin reference
    #[must_use]
    pub const fn new(chat_id: i64, message_id: i32) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// A download that finished during a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedDownload {
    /// Engine identifier
    pub id: TorrentId,
    /// Where the download was requested
    pub origin: Origin,
}

/// Remote identifiers awaiting completion
#[derive(Default)]
pub struct CompletionTracker {
    active: Mutex<HashMap<TorrentId, Origin>>,
}

impl CompletionTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id`. An already tracked id is silently overwritten.
    pub async fn track(&self, id: TorrentId, origin: Origin) {
        let mut active = self.active.lock().await;
        if active.insert(id, origin).is_some() {
            debug!(id, "Torrent was already tracked, origin replaced");
        }
    }

    /// Number of tracked downloads
    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Whether nothing is tracked
    pub async fn is_empty(&self) -> bool {
        self.active.lock().await.is_empty()
    }

    /// Check every tracked id with `is_complete` and untrack finished ones.
    ///
    /// The lock is held for the whole pass. Each query gets `per_call` time;
    /// an error or timeout leaves the id tracked for the next pass. Once
    /// `cancel` fires no further queries are issued.
    pub async fn reconcile<F, Fut>(
        &self,
        per_call: Duration,
        cancel: &CancellationToken,
        mut is_complete: F,
    ) -> Vec<CompletedDownload>
    where
        F: FnMut(TorrentId) -> Fut,
        Fut: Future<Output = Result<bool, TransmissionError>>,
    {
        let mut active = self.active.lock().await;
        let mut ids: Vec<TorrentId> = active.keys().copied().collect();
        ids.sort_unstable();

        let mut completed = Vec::new();
        for id in ids {
            if cancel.is_cancelled() {
                break;
            }

            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                res = tokio::time::timeout(per_call, is_complete(id)) => res,
            };

            match outcome {
                Ok(Ok(true)) => {
                    if let Some(origin) = active.remove(&id) {
                        completed.push(CompletedDownload { id, origin });
                    }
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(id, error = %e, "Completion query failed, will retry"),
                Err(_) => warn!(id, timeout = ?per_call, "Completion query timed out, will retry"),
            }
        }
        completed
    }
}
