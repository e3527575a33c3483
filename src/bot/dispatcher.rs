//! Submission dispatcher
//!
//! Turns accepted chat events into category prompts, redeems pressed
//! category tokens into engine adds and hands accepted downloads to the
//! completion tracker.
//!
//! Per submission: offered → redeemed → tracked | rejected.

use crate::bot::tokens::{PendingSubmission, SubmissionKind, TokenRegistry};
use crate::bot::tracker::{CompletionTracker, Origin};
use crate::bot::transport::{CategoryButton, ChatTransport, FileResolveError};
use crate::bot::views::{DefaultDownloadView, DownloadView};
use crate::config::{
    Settings, CALLBACK_ANSWER_LIMIT, ENGINE_ADD_TIMEOUT, FILE_RESOLVE_TIMEOUT,
};
use crate::transmission::{bounded, TorrentEngine, TorrentId};
use crate::utils::truncate_bytes;
use crate::ytdl::{find_youtube_link, VideoFetcher};
use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// MIME type of `.torrent` files
pub const TORRENT_MIME: &str = "application/x-bittorrent";

/// Marker that starts a magnet descriptor
const MAGNET_PREFIX: &str = "magnet:?";

/// Closing punctuation that wraps links in chat text
const MAGNET_TRAILING: &[char] = &[')', '>', ']', ',', '.', ';', '"', '\''];

/// Extract the magnet descriptor from a message text.
#[must_use]
pub fn find_magnet(text: &str) -> Option<&str> {
    let start = text.find(MAGNET_PREFIX)?;
    text[start..]
        .split_whitespace()
        .next()
        .map(|token| token.trim_end_matches(MAGNET_TRAILING))
}

/// Whether an uploaded document is a `.torrent` file.
#[must_use]
pub fn is_torrent_document(file_name: Option<&str>, mime_type: Option<&str>) -> bool {
    let by_extension = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("torrent"));
    let by_mime = mime_type.is_some_and(|mt| mt.eq_ignore_ascii_case(TORRENT_MIME));
    by_extension || by_mime
}

/// Why a redeemed submission did not reach the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Token unknown, already used, or issued before a restart
    Expired,
    /// Uploaded file could not be fetched
    FileResolution,
    /// Engine refused or failed the add
    Engine,
}

/// Terminal state of a redeemed submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    /// Added to the engine and tracked for completion
    Tracked(TorrentId),
    /// Stopped before tracking
    Rejected(Rejection),
}

/// Result of a button press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    /// Where the submission ended up
    pub state: SubmissionState,
    /// Short answer for the callback popup, already fitted to the limit
    pub ack: String,
}

impl Redemption {
    fn rejected(reason: Rejection, ack: impl AsRef<str>) -> Self {
        Self {
            state: SubmissionState::Rejected(reason),
            ack: truncate_bytes(ack.as_ref(), CALLBACK_ANSWER_LIMIT),
        }
    }
}

/// Handles submission events for allow-listed chats
pub struct SubmissionDispatcher {
    allowed_chats: HashSet<i64>,
    categories: BTreeMap<String, String>,
    tokens: Arc<TokenRegistry>,
    tracker: Arc<CompletionTracker>,
    engine: Arc<dyn TorrentEngine>,
    transport: Arc<dyn ChatTransport>,
    video: Option<Arc<VideoFetcher>>,
    cancel: CancellationToken,
}

impl SubmissionDispatcher {
    /// Create a dispatcher over shared registry, tracker and collaborators.
    #[must_use]
    pub fn new(
        settings: &Settings,
        tokens: Arc<TokenRegistry>,
        tracker: Arc<CompletionTracker>,
        engine: Arc<dyn TorrentEngine>,
        transport: Arc<dyn ChatTransport>,
        cancel: CancellationToken,
    ) -> Self {
        let video = settings
            .youtube
            .enabled
            .then(|| Arc::new(VideoFetcher::new(&settings.youtube)));

        Self {
            allowed_chats: settings.allowed_chats(),
            categories: settings.categories.clone(),
            tokens,
            tracker,
            engine,
            transport,
            video,
            cancel,
        }
    }

    /// Whether events from `chat_id` are accepted
    #[must_use]
    pub fn is_allowed_chat(&self, chat_id: i64) -> bool {
        self.allowed_chats.contains(&chat_id)
    }

    /// Handle an incoming text message.
    ///
    /// Magnet descriptors get a category prompt; YouTube links start a
    /// video fetch when enabled. Anything else is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the category prompt cannot be sent.
    pub async fn handle_text(&self, origin: Origin, text: &str) -> Result<()> {
        if let Some(magnet) = find_magnet(text) {
            self.offer_categories(origin, magnet, SubmissionKind::Descriptor)
                .await?;
        } else if let Some(url) = find_youtube_link(text) {
            self.start_video_fetch(origin, url);
        }
        Ok(())
    }

    /// Handle an uploaded document, offering categories for `.torrent` files.
    ///
    /// # Errors
    ///
    /// Returns an error if the category prompt cannot be sent.
    pub async fn handle_document(
        &self,
        origin: Origin,
        file_ref: &str,
        file_name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<()> {
        if is_torrent_document(file_name, mime_type) {
            self.offer_categories(origin, file_ref, SubmissionKind::TorrentFile)
                .await?;
        } else {
            debug!(?file_name, ?mime_type, "Ignoring non-torrent document");
        }
        Ok(())
    }

    /// Reply to `origin` with one button per configured category.
    ///
    /// Each button carries a fresh token bound to a [`PendingSubmission`].
    /// Chats outside the allow-list are ignored without any state change.
    /// Returns the number of buttons offered.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt cannot be sent.
    pub async fn offer_categories(
        &self,
        origin: Origin,
        payload: &str,
        kind: SubmissionKind,
    ) -> Result<usize> {
        if !self.is_allowed_chat(origin.chat_id) {
            return Ok(0);
        }
        if self.categories.is_empty() {
            warn!(chat_id = origin.chat_id, "No categories configured, submission ignored");
            return Ok(0);
        }

        let mut buttons = Vec::with_capacity(self.categories.len());
        for (category, target_dir) in &self.categories {
            let token = self
                .tokens
                .issue(PendingSubmission {
                    kind,
                    payload: payload.to_string(),
                    target_dir: target_dir.clone(),
                    category: category.clone(),
                })
                .await;
            buttons.push(CategoryButton {
                label: category.clone(),
                token,
            });
        }

        let offered = buttons.len();
        self.transport
            .send_choices(origin, DefaultDownloadView::choose_category(), buttons)
            .await?;

        info!(
            chat_id = origin.chat_id,
            message_id = origin.message_id,
            ?kind,
            offered,
            "Offered download categories"
        );
        Ok(offered)
    }

    /// Redeem a pressed category button.
    ///
    /// `origin` is the message carrying the buttons; it is edited on success
    /// and later receives the completion notice.
    pub async fn redeem(&self, token: &str, origin: Origin) -> Redemption {
        let Some(submission) = self.tokens.redeem(token).await else {
            debug!(token, chat_id = origin.chat_id, "Category token expired or unknown");
            return Redemption::rejected(Rejection::Expired, DefaultDownloadView::token_expired());
        };

        let added = match submission.kind {
            SubmissionKind::Descriptor => {
                bounded(
                    &self.cancel,
                    ENGINE_ADD_TIMEOUT,
                    self.engine
                        .add_magnet(&submission.payload, &submission.target_dir),
                )
                .await
            }
            SubmissionKind::TorrentFile => {
                let raw = match self.resolve_file(&submission.payload).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(chat_id = origin.chat_id, error = %e, "Torrent file resolution failed");
                        return Redemption::rejected(
                            Rejection::FileResolution,
                            DefaultDownloadView::file_error(&e),
                        );
                    }
                };
                bounded(
                    &self.cancel,
                    ENGINE_ADD_TIMEOUT,
                    self.engine.add_torrent_file(raw, &submission.target_dir),
                )
                .await
            }
        };

        let id = match added {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    chat_id = origin.chat_id,
                    category = %submission.category,
                    error = %e,
                    "Engine rejected torrent"
                );
                return Redemption::rejected(Rejection::Engine, DefaultDownloadView::engine_error(&e));
            }
        };

        self.tracker.track(id, origin).await;
        info!(
            id,
            chat_id = origin.chat_id,
            category = %submission.category,
            dir = %submission.target_dir,
            "Torrent added and tracked"
        );

        if let Err(e) = self
            .transport
            .replace_text(origin, &DefaultDownloadView::accepted(&submission.category))
            .await
        {
            error!(chat_id = origin.chat_id, "Failed to edit category prompt: {e}");
        }

        Redemption {
            state: SubmissionState::Tracked(id),
            ack: truncate_bytes(DefaultDownloadView::added(), CALLBACK_ANSWER_LIMIT),
        }
    }

    /// Tracked downloads and outstanding tokens, for `/status`.
    pub async fn status(&self) -> (usize, usize) {
        (self.tracker.len().await, self.tokens.pending_count().await)
    }

    async fn resolve_file(&self, file_ref: &str) -> Result<Vec<u8>, FileResolveError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(FileResolveError::Cancelled),
            res = tokio::time::timeout(FILE_RESOLVE_TIMEOUT, self.transport.resolve_file(file_ref)) => {
                res.unwrap_or(Err(FileResolveError::Timeout))
            }
        }
    }

    fn start_video_fetch(&self, origin: Origin, url: &str) {
        let Some(fetcher) = self.video.clone() else {
            return;
        };
        if !self.is_allowed_chat(origin.chat_id) {
            return;
        }

        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = transport
                .reply(origin, DefaultDownloadView::video_started())
                .await
            {
                error!("Failed to send video start notice: {e}");
            }

            let text = match fetcher.fetch(&url, &cancel).await {
                Ok(()) => DefaultDownloadView::video_finished().to_string(),
                Err(crate::ytdl::VideoFetchError::Cancelled) => return,
                Err(e) => {
                    warn!(url = %url, error = %e, "Video fetch failed");
                    DefaultDownloadView::video_failed(&e.to_string())
                }
            };

            if let Err(e) = transport.reply(origin, &text).await {
                error!("Failed to send video result: {e}");
            }
        });
    }
}
