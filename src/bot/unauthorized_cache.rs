//! Log throttling for events from chats outside the allow-list
//!
//! Such events are dropped without any reply. This cache only keeps the
//! log readable: each chat is reported once per cooldown window, and
//! further attempts are counted.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cache of recently reported unauthorized chats
#[derive(Clone)]
pub struct UnauthorizedCache {
    /// Moka cache storing chat_id -> () mappings, expiring after the cooldown
    cache: Cache<i64, ()>,
    /// Counter for silenced attempts (for logging throttling)
    silenced_count: Arc<AtomicU64>,
}

impl UnauthorizedCache {
    /// Creates a new `UnauthorizedCache`
    ///
    /// # Arguments
    ///
    /// * `cooldown_secs` - Seconds before the same chat is reported again
    /// * `max_capacity` - Maximum number of remembered chats
    ///
    /// # Examples
    ///
    /// ```
    /// use transmission_tg_control::bot::UnauthorizedCache;
    ///
    /// let cache = UnauthorizedCache::new(
    ///     1200,   // 20 minutes cooldown
    ///     10_000  // max 10k entries
    /// );
    /// ```
    #[must_use]
    pub fn new(cooldown_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(cooldown_secs))
            .build();

        Self {
            cache,
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a dropped event from `chat_id`.
    ///
    /// Returns `true` if the attempt was logged, `false` if it was silenced
    /// because the chat was reported recently. Only every 100th silenced
    /// attempt is logged.
    pub async fn record(&self, chat_id: i64, chat_title: &str) -> bool {
        if self.cache.get(&chat_id).await.is_none() {
            self.cache.insert(chat_id, ()).await;
            debug!(
                "⛔️ Ignoring events from chat {} ({}) that is not in chat_whitelist",
                chat_id, chat_title
            );
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(100) {
            debug!(
                "⛔️ Silenced {} unauthorized events (recent: chat {} - {})",
                count, chat_id, chat_title
            );
        }

        false
    }

    /// Returns the total number of silenced unauthorized events
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }
}
