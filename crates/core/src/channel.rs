//! Channel trait: the abstraction over the chat platform.
//!
//! A Channel connects tracebot to a messaging platform. It normalizes
//! inbound events into [`InboundMessage`] values and sends text back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::memory::ConversationKey;

/// A normalized inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform message id (used for reply references)
    pub message_id: String,

    /// Author identifier
    pub author_id: String,

    /// Human-readable author name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// Whether the author is a bot account
    #[serde(default)]
    pub author_is_bot: bool,

    /// The channel the message was posted in
    pub channel_id: String,

    /// The guild (server), absent for direct messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    /// The text content
    pub content: String,

    /// Whether the message mentions the bot
    #[serde(default)]
    pub mentions_bot: bool,

    /// Whether the message arrived as a direct message
    #[serde(default)]
    pub is_direct: bool,
}

impl InboundMessage {
    /// The memory scope of this message's author in this channel.
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.author_id, &self.channel_id)
    }
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, message
/// formatting and authentication.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "discord").
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    async fn start(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError>;

    /// Send one message to a chat destination, optionally as a reply.
    async fn send(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _channel_id: &str) -> Result<(), ChannelError> {
        Ok(()) // No-op default
    }

    /// The bot's own user id, once known.
    fn bot_user_id(&self) -> Option<String> {
        None
    }

    /// Stop the channel gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Health check: is the channel connected and operational?
    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_per_user_per_channel() {
        let msg = InboundMessage {
            message_id: "m1".into(),
            author_id: "u1".into(),
            author_name: Some("alice".into()),
            author_is_bot: false,
            channel_id: "c1".into(),
            guild_id: Some("g1".into()),
            content: "!memory".into(),
            mentions_bot: false,
            is_direct: false,
        };
        let key = msg.conversation_key();
        assert_eq!(key, ConversationKey::new("u1", "c1"));
        assert_ne!(key, ConversationKey::new("u1", "c2"));
    }
}
