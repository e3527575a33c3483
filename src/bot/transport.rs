//! Chat transport seam
//!
//! The dispatcher and poll loop talk to Telegram only through
//! [`ChatTransport`]; [`TelegramTransport`] is the production adapter.

use crate::bot::tracker::Origin;
use crate::config::MESSAGE_LIMIT;
use crate::utils::truncate_bytes;
use anyhow::Result;
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode,
    ReplyParameters,
};
use thiserror::Error;
use tracing::info;

/// Maximum size of an uploaded file the Bot API lets us download (20 MB)
pub const MAX_FILE_SIZE: u32 = 20 * 1024 * 1024;

/// Failure to turn an uploaded file reference into bytes
#[derive(Debug, Error)]
pub enum FileResolveError {
    /// `getFile` failed
    #[error("file lookup failed: {0}")]
    Lookup(String),
    /// File exceeds what the Bot API serves
    #[error("file too large: {size} bytes (max {limit})")]
    TooLarge {
        /// Reported file size
        size: u32,
        /// Allowed maximum
        limit: u32,
    },
    /// Downloading the contents failed
    #[error("file download failed: {0}")]
    Download(String),
    /// Download produced no data
    #[error("downloaded file is empty")]
    Empty,
    /// Resolution exceeded its deadline
    #[error("file resolution timed out")]
    Timeout,
    /// Abandoned because of shutdown
    #[error("file resolution cancelled")]
    Cancelled,
}

/// One selectable category button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryButton {
    /// Visible label (category name)
    pub label: String,
    /// Opaque token sent back on press
    pub token: String,
}

/// Operations the bot needs from the chat side
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Reply to `origin` with `text` and one button per row.
    async fn send_choices(
        &self,
        origin: Origin,
        text: &str,
        buttons: Vec<CategoryButton>,
    ) -> Result<()>;

    /// Replace the text of the message at `origin` and remove its buttons.
    async fn replace_text(&self, origin: Origin, text: &str) -> Result<()>;

    /// Send `text` as a reply to the message at `origin`.
    async fn reply(&self, origin: Origin, text: &str) -> Result<()>;

    /// Fetch the contents of an uploaded file.
    async fn resolve_file(&self, file_ref: &str) -> Result<Vec<u8>, FileResolveError>;
}

/// Telegram implementation of [`ChatTransport`]
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Wrap a bot handle
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Build the inline keyboard for category buttons, one per row.
#[must_use]
pub fn category_keyboard(buttons: Vec<CategoryButton>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        buttons
            .into_iter()
            .map(|b| vec![InlineKeyboardButton::callback(b.label, b.token)]),
    )
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_choices(
        &self,
        origin: Origin,
        text: &str,
        buttons: Vec<CategoryButton>,
    ) -> Result<()> {
        self.bot
            .send_message(ChatId(origin.chat_id), truncate_bytes(text, MESSAGE_LIMIT))
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(MessageId(origin.message_id)))
            .reply_markup(category_keyboard(buttons))
            .await?;
        Ok(())
    }

    async fn replace_text(&self, origin: Origin, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(
                ChatId(origin.chat_id),
                MessageId(origin.message_id),
                truncate_bytes(text, MESSAGE_LIMIT),
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(InlineKeyboardMarkup::default())
            .await?;
        Ok(())
    }

    async fn reply(&self, origin: Origin, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(origin.chat_id), truncate_bytes(text, MESSAGE_LIMIT))
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(MessageId(origin.message_id)))
            .await?;
        Ok(())
    }

    async fn resolve_file(&self, file_ref: &str) -> Result<Vec<u8>, FileResolveError> {
        let file = self
            .bot
            .get_file(FileId(file_ref.to_string()))
            .await
            .map_err(|e| FileResolveError::Lookup(e.to_string()))?;

        if file.size > MAX_FILE_SIZE {
            return Err(FileResolveError::TooLarge {
                size: file.size,
                limit: MAX_FILE_SIZE,
            });
        }

        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| FileResolveError::Download(e.to_string()))?;

        if buf.is_empty() {
            return Err(FileResolveError::Empty);
        }

        info!(size = buf.len(), "Downloaded torrent file from Telegram");
        Ok(buf)
    }
}
