//! Tool gateway trait: the abstraction over the external tool provider.
//!
//! The tool provider is a separate process offering a fixed catalog of named,
//! schema-typed operations. The conversation loop only sees this trait: it
//! reads the catalog once per request and calls tools one at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// A tool advertised by the provider, sent to the LLM as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name
    pub name: String,

    /// What the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the tool input
    pub input_schema: serde_json::Value,
}

/// A request to execute a tool, as emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id (matches the model's tool_use id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Structured input
    pub input: serde_json::Value,
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The correlation id this result answers
    pub call_id: String,

    /// Text fed back to the model
    pub content: String,

    /// Whether the call failed
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// The core ToolGateway trait.
///
/// One long-lived connection per process: `initialize` once at startup,
/// `shutdown` once on exit. A failed `initialize` leaves the gateway
/// unavailable and the bot keeps answering without tools.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Human-readable name of the tool provider (e.g., "Sentry").
    fn name(&self) -> &str;

    /// Perform the handshake and load the tool catalog.
    async fn initialize(&self) -> Result<(), GatewayError>;

    /// Whether the handshake completed.
    fn is_available(&self) -> bool;

    /// The immutable catalog loaded during `initialize`.
    fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError>;

    /// Execute one tool call.
    ///
    /// Provider-side failures come back as `Ok` with `is_error` set. `Err` is
    /// reserved for a gateway that is not usable at all.
    async fn call_tool(&self, invocation: &ToolInvocation) -> Result<ToolResult, GatewayError>;

    /// Release the provider connection.
    async fn shutdown(&self) {}
}
