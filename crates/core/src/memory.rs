//! Conversation memory trait: short-lived, per-conversation history.
//!
//! Memory is process-lifetime only. Each conversation is scoped to one user
//! in one channel, and history is bounded both by count and by age.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Turn;

/// Identifies an isolated memory scope: one user in one channel.
///
/// Two different (user, channel) pairs never compare equal, whatever
/// characters the platform ids contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub user_id: String,
    pub channel_id: String,
}

impl ConversationKey {
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user_{}_channel_{}", self.user_id, self.channel_id)
    }
}

/// The core ConversationStore trait.
///
/// None of the operations can fail: appends may silently evict, reads may
/// silently expire old turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Append a turn, evicting the oldest one when the scope is full.
    async fn append(&self, key: &ConversationKey, turn: Turn);

    /// Drop every turn older than the retention window (permanently), then
    /// return what is left, oldest first. Unknown keys yield an empty list.
    async fn read(&self, key: &ConversationKey, now: DateTime<Utc>) -> Vec<Turn>;

    /// Remove all turns for a key.
    async fn clear(&self, key: &ConversationKey);

    /// Number of retained turns. Does not expire anything.
    async fn count(&self, key: &ConversationKey) -> usize;
}
