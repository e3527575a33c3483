//! Configuration and settings management
//!
//! Loads settings from a JSON file (path given on the command line) with
//! optional `TTC__*` environment overrides, and defines timing constants.

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum SettingsError {
    /// File could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    /// File was read but a required value is missing or invalid
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transmission RPC connection settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RpcSettings {
    /// RPC endpoint, either a bare host or a full URL
    pub url: String,
    /// RPC user (empty disables basic auth)
    #[serde(default)]
    pub user: String,
    /// RPC password
    #[serde(default)]
    pub password: String,
}

/// Video fetch settings
#[derive(Debug, Deserialize, Clone)]
pub struct YoutubeSettings {
    /// Enables fetching of YouTube links
    #[serde(rename = "youtube_enabled", default)]
    pub enabled: bool,
    /// Proxy passed to yt-dlp
    #[serde(default)]
    pub proxy: String,
    /// Directory where fetched videos are stored
    #[serde(default)]
    pub download_path: String,
    /// Path to the yt-dlp executable
    #[serde(default = "default_yt_dlp_location")]
    pub yt_dlp_location: String,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            proxy: String::new(),
            download_path: String::new(),
            yt_dlp_location: default_yt_dlp_location(),
        }
    }
}

fn default_yt_dlp_location() -> String {
    "yt-dlp".to_string()
}

/// Application settings
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub bot_token: String,
    /// Transmission RPC connection
    pub transmission_rpc: RpcSettings,
    /// Seconds between completion checks; non-positive means the default
    #[serde(default)]
    pub poll_interval_sec: i64,
    /// Chats allowed to use the bot
    #[serde(default)]
    pub chat_whitelist: Vec<i64>,
    /// Category name to download directory
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    /// Video fetch settings
    #[serde(default)]
    pub youtube: YoutubeSettings,
}

impl Settings {
    /// Load settings from a JSON file, applying `TTC__*` environment overrides.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use transmission_tg_control::config::Settings;
    ///
    /// let settings = Settings::load(Path::new("config.json")).expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if the file is unreadable, malformed or incomplete.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let built = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json).required(true))
            // Eg. `TTC__BOT_TOKEN=...` overrides `bot_token`
            .add_source(
                Environment::with_prefix("TTC")
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?;
        Self::from_config(built)
    }

    /// Parse settings from an in-memory JSON document.
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if the document is malformed or incomplete.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let built = Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?;
        Self::from_config(built)
    }

    fn from_config(built: Config) -> Result<Self, SettingsError> {
        let settings: Self = built.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.bot_token.trim().is_empty() {
            return Err(SettingsError::Invalid("bot_token is empty".to_string()));
        }
        if self.transmission_rpc.url.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "transmission_rpc.url is empty".to_string(),
            ));
        }
        if self.youtube.enabled && self.youtube.download_path.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "youtube.download_path is required when youtube is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Interval between completion checks.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        u64::try_from(self.poll_interval_sec)
            .ok()
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs)
    }

    /// Returns the set of chat IDs allowed to use the bot
    #[must_use]
    pub fn allowed_chats(&self) -> HashSet<i64> {
        self.chat_whitelist.iter().copied().collect()
    }
}

/// Poll interval used when none (or a non-positive one) is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Deadline for adding a torrent to the remote engine
pub const ENGINE_ADD_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for one completion query during a reconciliation pass
pub const COMPLETION_QUERY_TIMEOUT: Duration = Duration::from_secs(15);
/// Deadline for fetching an uploaded `.torrent` file from Telegram
pub const FILE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP client timeout for Transmission RPC
pub const RPC_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram `answerCallbackQuery` text limit we keep to
pub const CALLBACK_ANSWER_LIMIT: usize = 200;
/// Telegram `sendMessage` / `editMessageText` limit
pub const MESSAGE_LIMIT: usize = 4096;
/// Telegram inline button `callback_data` limit (bytes)
pub const CALLBACK_DATA_LIMIT: usize = 64;

/// Cooldown (seconds) between log lines about the same unauthorized chat.
pub const UNAUTHORIZED_COOLDOWN_SECS: u64 = 1200;
/// Maximum number of unauthorized chats remembered for log throttling.
pub const UNAUTHORIZED_CACHE_MAX_SIZE: u64 = 10_000;
