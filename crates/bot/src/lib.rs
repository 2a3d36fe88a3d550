//! Inbound message handling for tracebot.
//!
//! [`Bridge::handle`] is the single entry point for a normalized chat
//! message. It drops messages that are not for us, runs prefix commands and
//! treats mentions and direct messages as implicit questions.

pub mod bridge;
pub mod command;

pub use bridge::{Bridge, BridgeSettings, Disposition, GREETING};
pub use command::Command;
