//! In-memory conversation store. History dies with the process.
//!
//! Each scope is a bounded FIFO. Age-based expiry happens lazily on `read`,
//! so there is no background sweeper.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracebot_core::memory::{ConversationKey, ConversationStore};
use tracebot_core::message::Turn;
use tracing::debug;

/// Turns kept per conversation.
pub const DEFAULT_CAPACITY: usize = 10;

/// Age after which a turn is dropped on the next read.
pub const DEFAULT_RETENTION_MINUTES: i64 = 120;

/// Per-conversation bounded history with a retention window.
pub struct InMemoryStore {
    capacity: usize,
    retention: Duration,
    scopes: RwLock<HashMap<ConversationKey, VecDeque<Turn>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, Duration::minutes(DEFAULT_RETENTION_MINUTES))
    }

    /// A zero capacity is bumped to one.
    pub fn with_limits(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retention,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of scopes currently holding turns.
    pub async fn scope_count(&self) -> usize {
        self.scopes.read().await.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, key: &ConversationKey, turn: Turn) {
        let mut scopes = self.scopes.write().await;
        let history = scopes.entry(key.clone()).or_default();
        while history.len() >= self.capacity {
            history.pop_front();
            debug!(conversation_key = %key, "Evicted oldest turn at capacity");
        }
        history.push_back(turn);
    }

    async fn read(&self, key: &ConversationKey, now: DateTime<Utc>) -> Vec<Turn> {
        let mut scopes = self.scopes.write().await;
        let Some(history) = scopes.get_mut(key) else {
            return Vec::new();
        };

        let before = history.len();
        while history
            .front()
            .is_some_and(|turn| now - turn.timestamp > self.retention)
        {
            history.pop_front();
        }
        if history.len() < before {
            debug!(
                conversation_key = %key,
                expired = before - history.len(),
                "Expired turns past retention window"
            );
        }

        if history.is_empty() {
            scopes.remove(key);
            return Vec::new();
        }
        history.iter().cloned().collect()
    }

    async fn clear(&self, key: &ConversationKey) {
        self.scopes.write().await.remove(key);
    }

    async fn count(&self, key: &ConversationKey) -> usize {
        self.scopes.read().await.get(key).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new("user1", "chan1")
    }

    #[tokio::test]
    async fn append_and_read_in_order() {
        let mem = InMemoryStore::new();
        mem.append(&key(), Turn::user("first")).await;
        mem.append(&key(), Turn::assistant("second")).await;

        let turns = mem.read(&key(), Utc::now()).await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text(), "first");
        assert_eq!(turns[1].text(), "second");
    }

    #[tokio::test]
    async fn capacity_keeps_most_recent() {
        let mem = InMemoryStore::new();
        for i in 0..25 {
            mem.append(&key(), Turn::user(format!("msg {i}"))).await;
        }

        assert_eq!(mem.count(&key()).await, DEFAULT_CAPACITY);
        let turns = mem.read(&key(), Utc::now()).await;
        let texts: Vec<String> = turns.iter().map(Turn::text).collect();
        let expected: Vec<String> = (15..25).map(|i| format!("msg {i}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn expired_turns_are_removed_permanently() {
        let mem = InMemoryStore::new();
        let now = Utc::now();
        mem.append(&key(), Turn::user("stale").at(now - Duration::hours(3)))
            .await;
        mem.append(&key(), Turn::assistant("also stale").at(now - Duration::minutes(121)))
            .await;
        mem.append(&key(), Turn::user("fresh").at(now - Duration::minutes(5)))
            .await;

        // count does not expire anything
        assert_eq!(mem.count(&key()).await, 3);

        let turns = mem.read(&key(), now).await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text(), "fresh");

        assert_eq!(mem.count(&key()).await, 1);
        let again = mem.read(&key(), now).await;
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn turn_exactly_at_window_is_kept() {
        let mem = InMemoryStore::new();
        let now = Utc::now();
        mem.append(&key(), Turn::user("edge").at(now - Duration::minutes(120)))
            .await;
        assert_eq!(mem.read(&key(), now).await.len(), 1);
    }

    #[tokio::test]
    async fn clear_then_read_is_empty() {
        let mem = InMemoryStore::new();
        mem.append(&key(), Turn::user("a")).await;
        mem.append(&key(), Turn::assistant("b")).await;

        mem.clear(&key()).await;
        assert!(mem.read(&key(), Utc::now()).await.is_empty());
        assert_eq!(mem.count(&key()).await, 0);
    }

    #[tokio::test]
    async fn unknown_key_reads_empty() {
        let mem = InMemoryStore::new();
        assert!(mem.read(&key(), Utc::now()).await.is_empty());
        assert_eq!(mem.scope_count().await, 0);
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let mem = InMemoryStore::new();
        let other = ConversationKey::new("user1", "chan2");
        mem.append(&key(), Turn::user("here")).await;
        mem.append(&other, Turn::user("there")).await;

        mem.clear(&other).await;
        assert_eq!(mem.count(&key()).await, 1);
        assert_eq!(mem.count(&other).await, 0);
    }

    #[tokio::test]
    async fn fully_expired_scope_is_dropped() {
        let mem = InMemoryStore::with_limits(3, Duration::minutes(1));
        let now = Utc::now();
        mem.append(&key(), Turn::user("old").at(now - Duration::minutes(2)))
            .await;
        assert_eq!(mem.scope_count().await, 1);

        assert!(mem.read(&key(), now).await.is_empty());
        assert_eq!(mem.scope_count().await, 0);
    }

    #[test]
    fn zero_capacity_is_bumped() {
        let mem = InMemoryStore::with_limits(0, Duration::minutes(1));
        assert_eq!(mem.capacity(), 1);
    }
}
