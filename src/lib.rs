#![deny(missing_docs)]
//! Transmission Telegram control library.
//!
//! Accepts torrents and magnet links from allow-listed Telegram chats,
//! hands them to a Transmission daemon and reports completed downloads.

/// Telegram bot: submissions, callbacks and completion polling.
pub mod bot;
/// Configuration management.
pub mod config;
/// Transmission RPC client.
pub mod transmission;
/// Utility functions.
pub mod utils;
/// Video fetching via yt-dlp.
pub mod ytdl;
