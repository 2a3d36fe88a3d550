//! # tracebot core
//!
//! Domain types, traits, and error definitions for the tracebot chat bridge.
//! This crate has **no I/O of its own**: it defines the model that the
//! provider, tool gateway, memory, channel and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the conversation loop is a trait here:
//! - [`Provider`] answers LLM queries
//! - [`ToolGateway`] lists and calls external tools
//! - [`ConversationStore`] keeps short-lived per-conversation history
//! - [`Channel`] receives and sends chat messages
//!
//! Implementations live in their respective crates, and tests swap in
//! scripted stand-ins.

pub mod channel;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, InboundMessage};
pub use error::{ChannelError, GatewayError, ProviderError};
pub use event::{DomainEvent, EventBus};
pub use memory::{ConversationKey, ConversationStore};
pub use message::{ContentBlock, MessageContent, Role, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{ToolDescriptor, ToolGateway, ToolInvocation, ToolResult};
