//! Tool gateway implementations for tracebot.
//!
//! The external tool provider speaks MCP (JSON-RPC 2.0) over the stdio of a
//! child process. [`McpGateway`] owns that process for the life of the bot;
//! [`DisabledGateway`] stands in when the provider is switched off.

pub mod disabled;
pub mod mcp;

pub use disabled::DisabledGateway;
pub use mcp::{McpConnection, McpError, McpGateway};
