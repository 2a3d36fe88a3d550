//! Channel implementations for tracebot.
//!
//! [`DiscordChannel`] connects to Discord; [`ResponseDispatcher`] sends long
//! replies through any [`Channel`](tracebot_core::Channel) in pieces.

pub mod discord;
pub mod dispatcher;

pub use discord::DiscordChannel;
pub use dispatcher::{DEFAULT_CHUNK_LIMIT, ResponseDispatcher, chunk_text};
