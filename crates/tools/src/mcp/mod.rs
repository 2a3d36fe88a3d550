//! MCP client over stdio.

pub mod connection;
pub mod gateway;
pub mod types;

pub use connection::{McpConnection, McpError};
pub use gateway::McpGateway;
