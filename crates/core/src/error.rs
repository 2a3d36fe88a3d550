//! Error types for the tracebot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; the binary boxes them.

use thiserror::Error;

/// Failures while querying the LLM. Every variant is an `LLMQueryFailure`:
/// the loop turns it into a user-visible apology and stops.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unusable response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the tool provider connection itself.
///
/// Individual tool failures are not errors: they come back as a
/// [`ToolResult`](crate::tool::ToolResult) with `is_error` set.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Tool gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Tool gateway protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Whether this error means the gateway cannot be used at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}
