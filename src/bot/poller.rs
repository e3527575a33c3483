//! Completion poll loop
//!
//! Periodically reconciles tracked downloads against the engine and
//! notifies the originating chat about finished ones.

use crate::bot::tracker::CompletionTracker;
use crate::bot::transport::ChatTransport;
use crate::bot::views::{DefaultDownloadView, DownloadView};
use crate::config::COMPLETION_QUERY_TIMEOUT;
use crate::transmission::TorrentEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Background task checking tracked downloads on a fixed interval
pub struct PollLoop {
    tracker: Arc<CompletionTracker>,
    engine: Arc<dyn TorrentEngine>,
    transport: Arc<dyn ChatTransport>,
    interval: Duration,
    cancel: CancellationToken,
}

impl PollLoop {
    /// Create a poll loop; it does nothing until [`PollLoop::run`] is awaited.
    #[must_use]
    pub fn new(
        tracker: Arc<CompletionTracker>,
        engine: Arc<dyn TorrentEngine>,
        transport: Arc<dyn ChatTransport>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            engine,
            transport,
            interval,
            cancel,
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(self) {
        // First check happens one interval after start, not immediately.
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Completion poll loop started");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("Completion poll loop stopped");
    }

    /// One reconciliation pass; returns how many downloads completed.
    pub async fn tick(&self) -> usize {
        let engine = Arc::clone(&self.engine);
        let completed = self
            .tracker
            .reconcile(COMPLETION_QUERY_TIMEOUT, &self.cancel, move |id| {
                let engine = Arc::clone(&engine);
                async move { engine.torrent_status(id).await.map(|s| s.is_complete()) }
            })
            .await;

        if completed.is_empty() {
            debug!("No downloads completed this pass");
        }

        for done in &completed {
            info!(
                id = done.id,
                chat_id = done.origin.chat_id,
                "Download completed"
            );
            if let Err(e) = self
                .transport
                .reply(done.origin, &DefaultDownloadView::download_finished(done.id))
                .await
            {
                error!(id = done.id, "Failed to send completion notice: {e}");
            }
        }
        completed.len()
    }
}
