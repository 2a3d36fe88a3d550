//! LLM provider implementation for tracebot.
//!
//! The provider implements the `tracebot_core::Provider` trait. Only one
//! backend is supported: Anthropic's Messages API.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
