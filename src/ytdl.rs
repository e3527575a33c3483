//! Video fetching via the yt-dlp executable
//!
//! A fetch is a child process bound to a cancellation token: shutdown kills
//! it instead of leaving it running detached.

use crate::config::YoutubeSettings;
use crate::utils::truncate_str;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hosts accepted as YouTube links
const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// Maximum characters of yt-dlp stderr kept in an error
const MAX_ERROR_LENGTH: usize = 300;

/// Errors that can occur while fetching a video
#[derive(Debug, Error)]
pub enum VideoFetchError {
    /// The link does not point to YouTube
    #[error("not a YouTube URL")]
    NotYoutube,
    /// yt-dlp could not be started
    #[error("failed to start yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),
    /// yt-dlp exited unsuccessfully
    #[error("yt-dlp exited with {status}: {stderr}")]
    Failed {
        /// Exit status description
        status: String,
        /// Tail of stderr
        stderr: String,
    },
    /// Abandoned because of shutdown
    #[error("video fetch cancelled")]
    Cancelled,
}

/// Find the first YouTube link in a message text.
#[must_use]
pub fn find_youtube_link(text: &str) -> Option<&str> {
    text.split_whitespace().find(|word| is_youtube_url(word))
}

fn is_youtube_url(url: &str) -> bool {
    (url.starts_with("http://") || url.starts_with("https://") || !url.contains("://"))
        && YOUTUBE_HOSTS.iter().any(|host| url.contains(host))
}

/// yt-dlp runner
#[derive(Debug, Clone)]
pub struct VideoFetcher {
    program: String,
    proxy: Option<String>,
    download_path: PathBuf,
}

impl VideoFetcher {
    /// Build a fetcher from configuration
    #[must_use]
    pub fn new(settings: &YoutubeSettings) -> Self {
        Self {
            program: settings.yt_dlp_location.clone(),
            proxy: (!settings.proxy.is_empty()).then(|| settings.proxy.clone()),
            download_path: PathBuf::from(&settings.download_path),
        }
    }

    /// Arguments passed to yt-dlp for `url`
    #[must_use]
    pub fn arguments(&self, url: &str) -> Vec<String> {
        let output = self.download_path.join("%(title)s.%(ext)s");
        let mut args = vec![
            "--break-on-existing".to_string(),
            "--no-progress".to_string(),
            "--no-playlist".to_string(),
            "--no-overwrites".to_string(),
            "--continue".to_string(),
            "-S".to_string(),
            "res,ext:mp4:m4a".to_string(),
            "--recode-video".to_string(),
            "mp4".to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
        ];
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    /// Download `url`, returning when yt-dlp exits or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a `VideoFetchError` if the link is not YouTube, yt-dlp cannot
    /// be started or fails, or the fetch is cancelled.
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<(), VideoFetchError> {
        if !is_youtube_url(url) {
            return Err(VideoFetchError::NotYoutube);
        }

        debug!(program = %self.program, url, "Starting yt-dlp");
        let child = Command::new(&self.program)
            .args(self.arguments(url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            () = cancel.cancelled() => return Err(VideoFetchError::Cancelled),
            res = child.wait_with_output() => res?,
        };

        if output.status.success() {
            info!(url, "Video fetched");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        Err(VideoFetchError::Failed {
            status: output.status.to_string(),
            stderr: truncate_str(last_line, MAX_ERROR_LENGTH),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(proxy: &str) -> YoutubeSettings {
        YoutubeSettings {
            enabled: true,
            proxy: proxy.to_string(),
            download_path: "/d/video".to_string(),
            yt_dlp_location: "yt-dlp".to_string(),
        }
    }

    #[test]
    fn test_find_youtube_link() {
        assert_eq!(
            find_youtube_link("look https://www.youtube.com/watch?v=abc please"),
            Some("https://www.youtube.com/watch?v=abc")
        );
        assert_eq!(
            find_youtube_link("https://youtu.be/abc"),
            Some("https://youtu.be/abc")
        );
        assert_eq!(find_youtube_link("https://vimeo.com/1"), None);
        assert_eq!(find_youtube_link("ftp://youtube.com/x"), None);
    }

    #[test]
    fn test_arguments_include_proxy_and_url_last() {
        let fetcher = VideoFetcher::new(&settings("socks5://127.0.0.1:1080"));
        let args = fetcher.arguments("https://youtu.be/abc");

        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/abc"));
        assert!(args.windows(2).any(|w| w[0] == "--proxy" && w[1] == "socks5://127.0.0.1:1080"));
        assert!(args.contains(&"/d/video/%(title)s.%(ext)s".to_string()));
    }

    #[test]
    fn test_arguments_without_proxy() {
        let fetcher = VideoFetcher::new(&settings(""));
        assert!(!fetcher.arguments("https://youtu.be/abc").contains(&"--proxy".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_non_youtube_before_spawning() {
        let fetcher = VideoFetcher {
            program: "/nonexistent/yt-dlp".to_string(),
            proxy: None,
            download_path: PathBuf::from("/tmp"),
        };
        let res = fetcher
            .fetch("https://example.com/video", &CancellationToken::new())
            .await;
        assert!(matches!(res, Err(VideoFetchError::NotYoutube)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let fetcher = VideoFetcher {
            program: "/nonexistent/yt-dlp".to_string(),
            proxy: None,
            download_path: PathBuf::from("/tmp"),
        };
        let res = fetcher
            .fetch("https://youtu.be/abc", &CancellationToken::new())
            .await;
        assert!(matches!(res, Err(VideoFetchError::Spawn(_))));
    }
}
