pub mod check_config;
pub mod run;
pub mod status;

use std::sync::Arc;

use tracebot_config::AppConfig;
use tracebot_core::tool::ToolGateway;
use tracebot_tools::{DisabledGateway, McpGateway};

/// The configured tool gateway, not yet initialized.
pub fn build_gateway(config: &AppConfig) -> Arc<dyn ToolGateway> {
    let tools = &config.tool_provider;
    if tools.enabled {
        Arc::new(McpGateway::from_config(tools))
    } else {
        Arc::new(DisabledGateway::new(tools.label.clone()))
    }
}
