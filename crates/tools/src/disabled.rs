//! Gateway used when the tool provider is switched off in config.

use async_trait::async_trait;
use tracebot_core::error::GatewayError;
use tracebot_core::tool::{ToolDescriptor, ToolGateway, ToolInvocation, ToolResult};

pub struct DisabledGateway {
    label: String,
}

impl DisabledGateway {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    fn unavailable(&self) -> GatewayError {
        GatewayError::Unavailable(format!("{} is disabled", self.label))
    }
}

#[async_trait]
impl ToolGateway for DisabledGateway {
    fn name(&self) -> &str {
        &self.label
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        Err(self.unavailable())
    }

    fn is_available(&self) -> bool {
        false
    }

    fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        Err(self.unavailable())
    }

    async fn call_tool(&self, _invocation: &ToolInvocation) -> Result<ToolResult, GatewayError> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_available() {
        let gateway = DisabledGateway::new("Sentry");
        assert_eq!(gateway.name(), "Sentry");
        assert!(gateway.initialize().await.unwrap_err().is_unavailable());
        assert!(!gateway.is_available());
        assert!(gateway.list_tools().is_err());
    }
}
