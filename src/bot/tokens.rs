//! Single-use category tokens
//!
//! Inline buttons carry only a short opaque token; the submission it stands
//! for lives here until the button is pressed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// How the submission payload should be handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// Payload is a magnet-style descriptor, added as-is
    Descriptor,
    /// Payload is a Telegram file id of an uploaded `.torrent`
    TorrentFile,
}

/// A download request waiting for the user to pick a category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    /// Payload interpretation
    pub kind: SubmissionKind,
    /// Magnet descriptor or file reference
    pub payload: String,
    /// Engine download directory of the offered category
    pub target_dir: String,
    /// Human-readable category name
    pub category: String,
}

/// Registry of issued, not yet redeemed tokens
#[derive(Default)]
pub struct TokenRegistry {
    seed: AtomicU64,
    pending: Mutex<HashMap<String, PendingSubmission>>,
}

impl TokenRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `submission` under a fresh token and return the token.
    ///
    /// Tokens are the hex form of a process-wide counter, so they never
    /// collide and stay far below the 64-byte callback data limit.
    pub async fn issue(&self, submission: PendingSubmission) -> String {
        let n = self.seed.fetch_add(1, Ordering::Relaxed) + 1;
        let token = format!("{n:x}");
        self.pending.lock().await.insert(token.clone(), submission);
        token
    }

    /// Take the submission bound to `token`, removing it.
    ///
    /// Returns `None` for unknown, already redeemed or pre-restart tokens.
    pub async fn redeem(&self, token: &str) -> Option<PendingSubmission> {
        self.pending.lock().await.remove(token)
    }

    /// Number of tokens still waiting for redemption
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CALLBACK_DATA_LIMIT;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn magnet(category: &str) -> PendingSubmission {
        PendingSubmission {
            kind: SubmissionKind::Descriptor,
            payload: "magnet:?xt=urn:btih:abc".to_string(),
            target_dir: format!("/d/{category}"),
            category: category.to_string(),
        }
    }

    #[tokio::test]
    async fn test_redeem_is_single_use() {
        let registry = TokenRegistry::new();
        let token = registry.issue(magnet("movies")).await;

        assert_eq!(registry.redeem(&token).await, Some(magnet("movies")));
        assert_eq!(registry.redeem(&token).await, None);
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let registry = TokenRegistry::new();
        assert_eq!(registry.redeem("ff").await, None);
        assert_eq!(registry.redeem("").await, None);
    }

    #[tokio::test]
    async fn test_tokens_fit_callback_data() {
        let registry = TokenRegistry::new();
        registry.seed.store(u64::MAX - 1, Ordering::Relaxed);
        let token = registry.issue(magnet("movies")).await;
        assert_eq!(token, "ffffffffffffffff");
        assert!(token.len() <= CALLBACK_DATA_LIMIT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_yields_distinct_tokens() {
        let registry = Arc::new(TokenRegistry::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.issue(magnet(&format!("cat{i}"))).await
            }));
        }

        let mut tokens = HashSet::new();
        for handle in handles {
            tokens.insert(handle.await.expect("issue task"));
        }
        assert_eq!(tokens.len(), 64);
        assert_eq!(registry.pending_count().await, 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redeem_single_winner() {
        let registry = Arc::new(TokenRegistry::new());
        let token = registry.issue(magnet("shows")).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let token = token.clone();
            handles.push(tokio::spawn(async move { registry.redeem(&token).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("redeem task").is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
