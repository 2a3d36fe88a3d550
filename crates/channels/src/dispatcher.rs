//! Outbound message splitting.
//!
//! Chat platforms cap message length. The dispatcher cuts a reply into
//! fixed-size pieces and sends them one after another, in order.

use tracebot_core::channel::Channel;
use tracebot_core::error::ChannelError;
use tracing::debug;

/// Discord's per-message character limit.
pub const DEFAULT_CHUNK_LIMIT: usize = 2000;

/// Split `text` into pieces of at most `limit` characters.
///
/// Plain fixed-size cut: word and line boundaries are not considered, but a
/// character is never split. Empty text yields one empty piece.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        if count == limit {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    chunks.push(current);
    chunks
}

/// Sends replies through a [`Channel`] in limit-sized chunks.
#[derive(Debug, Clone)]
pub struct ResponseDispatcher {
    limit: usize,
}

impl ResponseDispatcher {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Send `text` to `channel_id`, each chunk as its own message. When
    /// `reply_to` is set every chunk references that message. Stops at the
    /// first failed send; returns how many chunks went out.
    pub async fn dispatch(
        &self,
        channel: &dyn Channel,
        channel_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<usize, ChannelError> {
        let chunks = chunk_text(text, self.limit);
        debug!(
            channel = channel.name(),
            channel_id,
            chunks = chunks.len(),
            "Dispatching response"
        );
        for chunk in &chunks {
            channel.send(channel_id, chunk, reply_to).await?;
        }
        Ok(chunks.len())
    }
}

impl Default for ResponseDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_LIMIT)
    }
}
