//! `ToolGateway` over an MCP stdio server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracebot_config::ToolProviderConfig;
use tracebot_core::error::GatewayError;
use tracebot_core::tool::{ToolDescriptor, ToolGateway, ToolInvocation, ToolResult};
use tracing::{debug, error, info, warn};

use super::connection::{McpConnection, McpError};
use super::types::{
    CallToolParams, CallToolResult, ClientInfo, InitializeParams, InitializeResult,
    ListToolsParams, ListToolsResult, PROTOCOL_VERSION,
};

/// Upper bound on `tools/list` pages, against servers that never stop
/// returning a cursor.
const MAX_LIST_PAGES: usize = 50;

struct Session {
    connection: Arc<McpConnection>,
    tools: Vec<ToolDescriptor>,
}

/// A long-lived connection to one MCP tool provider.
pub struct McpGateway {
    label: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    handshake_timeout: Duration,
    call_timeout: Duration,
    session: RwLock<Option<Session>>,
}

impl McpGateway {
    pub fn new(label: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
            handshake_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
            session: RwLock::new(None),
        }
    }

    pub fn from_config(config: &ToolProviderConfig) -> Self {
        Self {
            env: config.env.clone(),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            ..Self::new(&config.label, &config.command, config.resolved_args())
        }
    }

    /// Run the handshake over an existing connection and keep it on success.
    pub async fn attach(&self, connection: McpConnection) -> Result<(), GatewayError> {
        match self.handshake(&connection).await {
            Ok(tools) => {
                info!(
                    provider = %self.label,
                    tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    "Connected to tool provider"
                );
                self.set_session(Some(Session {
                    connection: Arc::new(connection),
                    tools,
                }));
                Ok(())
            }
            Err(e) => {
                error!(provider = %self.label, error = %e, "Failed to connect to tool provider");
                connection.close().await;
                self.set_session(None);
                Err(GatewayError::Unavailable(e.to_string()))
            }
        }
    }

    async fn handshake(&self, connection: &McpConnection) -> Result<Vec<ToolDescriptor>, McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION,
            capabilities: json!({}),
            client_info: ClientInfo {
                name: "tracebot".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };
        let params =
            serde_json::to_value(params).map_err(|e| McpError::Protocol(e.to_string()))?;
        let result = connection
            .request("initialize", Some(params), self.handshake_timeout)
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Invalid initialize result: {e}")))?;
        debug!(
            protocol = ?init.protocol_version,
            server = ?init.server_info.as_ref().map(|s| s.name.as_str()),
            "MCP initialize complete"
        );

        connection.notify("notifications/initialized", None).await?;

        let mut tools = Vec::new();
        let mut cursor = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = serde_json::to_value(ListToolsParams { cursor })
                .map_err(|e| McpError::Protocol(e.to_string()))?;
            let result = connection
                .request("tools/list", Some(params), self.handshake_timeout)
                .await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("Invalid tools/list result: {e}")))?;

            tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
        warn!(provider = %self.label, "tools/list kept paginating, using what was loaded");
        Ok(tools)
    }

    fn set_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
    }

    fn connection(&self) -> Option<Arc<McpConnection>> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| Arc::clone(&s.connection))
    }
}

#[async_trait]
impl ToolGateway for McpGateway {
    fn name(&self) -> &str {
        &self.label
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        info!(provider = %self.label, command = %self.command, "Connecting to tool provider");
        match McpConnection::spawn(&self.command, &self.args, &self.env) {
            Ok(connection) => self.attach(connection).await,
            Err(e) => {
                error!(provider = %self.label, error = %e, "Failed to connect to tool provider");
                self.set_session(None);
                Err(GatewayError::Unavailable(e.to_string()))
            }
        }
    }

    fn is_available(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.tools.clone())
            .ok_or_else(|| GatewayError::Unavailable(format!("{} is not connected", self.label)))
    }

    async fn call_tool(&self, invocation: &ToolInvocation) -> Result<ToolResult, GatewayError> {
        let connection = self
            .connection()
            .ok_or_else(|| GatewayError::Unavailable(format!("{} is not connected", self.label)))?;

        info!(tool = %invocation.name, input = %invocation.input, "Tool call made");

        let arguments = (!invocation.input.is_null()).then_some(&invocation.input);
        let params = serde_json::to_value(CallToolParams {
            name: &invocation.name,
            arguments,
        })
        .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let outcome = connection
            .request("tools/call", Some(params), self.call_timeout)
            .await
            .and_then(|value| {
                serde_json::from_value::<CallToolResult>(value)
                    .map_err(|e| McpError::Protocol(format!("Invalid tools/call result: {e}")))
            });

        match outcome {
            Ok(result) => {
                let text = result.first_text().unwrap_or("No result").to_string();
                if result.is_error {
                    warn!(tool = %invocation.name, "Tool reported an error");
                    Ok(ToolResult::error(&invocation.id, text))
                } else {
                    Ok(ToolResult::success(&invocation.id, text))
                }
            }
            Err(e) => {
                warn!(tool = %invocation.name, error = %e, "Tool execution error");
                Ok(ToolResult::error(&invocation.id, format!("Error: {e}")))
            }
        }
    }

    async fn shutdown(&self) {
        let session = self
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(session) = session {
            info!(provider = %self.label, "Closing tool provider connection");
            session.connection.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// A scripted MCP server on an in-memory pipe. Records every method it
    /// receives.
    fn fake_server(
        pages: Vec<Vec<Value>>,
        fail_initialize: bool,
    ) -> (McpConnection, Arc<std::sync::Mutex<Vec<String>>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                log.lock().unwrap().push(method.clone());
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };

                let reply = match method.as_str() {
                    "initialize" if fail_initialize => {
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32603, "message": "bad token"}})
                    }
                    "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "fake", "version": "0.0.1"}
                    }}),
                    "tools/list" => {
                        let index: usize = msg["params"]["cursor"]
                            .as_str()
                            .map(|c| c.parse().unwrap())
                            .unwrap_or(0);
                        let mut result = json!({"tools": pages[index]});
                        if index + 1 < pages.len() {
                            result["nextCursor"] = json!((index + 1).to_string());
                        }
                        json!({"jsonrpc": "2.0", "id": id, "result": result})
                    }
                    "tools/call" => {
                        let name = msg["params"]["name"].as_str().unwrap_or_default();
                        match name {
                            "get_issue" => json!({"jsonrpc": "2.0", "id": id, "result": {
                                "content": [{"type": "text", "text": format!("Issue {} is resolved", msg["params"]["arguments"]["id"].as_str().unwrap_or("?"))}]
                            }}),
                            "empty" => json!({"jsonrpc": "2.0", "id": id, "result": {"content": []}}),
                            "flaky" => json!({"jsonrpc": "2.0", "id": id, "result": {
                                "content": [{"type": "text", "text": "upstream 502"}],
                                "isError": true
                            }}),
                            _ => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32602, "message": format!("Unknown tool: {name}")}}),
                        }
                    }
                    _ => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}),
                };
                server_write
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .unwrap();
            }
        });

        (McpConnection::from_streams(client_read, client_write), seen)
    }

    fn tool(name: &str) -> Value {
        json!({
            "name": name,
            "description": format!("{name} tool"),
            "inputSchema": {"type": "object", "properties": {"id": {"type": "string"}}}
        })
    }

    fn invocation(name: &str, input: Value) -> ToolInvocation {
        ToolInvocation {
            id: format!("toolu_{name}"),
            name: name.into(),
            input,
        }
    }

    #[tokio::test]
    async fn handshake_loads_all_pages() {
        let (conn, seen) = fake_server(
            vec![vec![tool("get_issue"), tool("list_projects")], vec![tool("search")]],
            false,
        );
        let gateway = McpGateway::new("Sentry", "unused", vec![]);
        gateway.attach(conn).await.unwrap();

        assert!(gateway.is_available());
        let names: Vec<String> = gateway.list_tools().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["get_issue", "list_projects", "search"]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["initialize", "notifications/initialized", "tools/list", "tools/list"]
        );
    }

    #[tokio::test]
    async fn failed_handshake_leaves_gateway_unavailable() {
        let (conn, _) = fake_server(vec![vec![]], true);
        let gateway = McpGateway::new("Sentry", "unused", vec![]);

        let err = gateway.attach(conn).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("bad token"));
        assert!(!gateway.is_available());
        assert!(gateway.list_tools().is_err());
    }

    #[tokio::test]
    async fn call_returns_first_text_item() {
        let (conn, _) = fake_server(vec![vec![tool("get_issue")]], false);
        let gateway = McpGateway::new("Sentry", "unused", vec![]);
        gateway.attach(conn).await.unwrap();

        let result = gateway
            .call_tool(&invocation("get_issue", json!({"id": "PROJ-123"})))
            .await
            .unwrap();
        assert_eq!(result.call_id, "toolu_get_issue");
        assert_eq!(result.content, "Issue PROJ-123 is resolved");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn empty_content_is_no_result() {
        let (conn, _) = fake_server(vec![vec![tool("empty")]], false);
        let gateway = McpGateway::new("Sentry", "unused", vec![]);
        gateway.attach(conn).await.unwrap();

        let result = gateway.call_tool(&invocation("empty", json!({}))).await.unwrap();
        assert_eq!(result.content, "No result");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn provider_errors_come_back_as_data() {
        let (conn, _) = fake_server(vec![vec![tool("get_issue")]], false);
        let gateway = McpGateway::new("Sentry", "unused", vec![]);
        gateway.attach(conn).await.unwrap();

        let unknown = gateway.call_tool(&invocation("nope", json!({}))).await.unwrap();
        assert!(unknown.is_error);
        assert!(unknown.content.starts_with("Error: "));
        assert!(unknown.content.contains("Unknown tool: nope"));

        let flagged = gateway.call_tool(&invocation("flaky", json!({}))).await.unwrap();
        assert!(flagged.is_error);
        assert_eq!(flagged.content, "upstream 502");

        // the connection survives tool failures
        assert!(gateway.is_available());
    }

    #[tokio::test]
    async fn call_before_initialize_is_unavailable() {
        let gateway = McpGateway::new("Sentry", "unused", vec![]);
        let err = gateway
            .call_tool(&invocation("get_issue", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let gateway = McpGateway::new(
            "Sentry",
            "tracebot-definitely-not-a-real-binary",
            vec!["--stdio".into()],
        );
        let err = gateway.initialize().await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!gateway.is_available());
    }

    #[tokio::test]
    async fn shutdown_makes_gateway_unavailable() {
        let (conn, _) = fake_server(vec![vec![tool("get_issue")]], false);
        let gateway = McpGateway::new("Sentry", "unused", vec![]);
        gateway.attach(conn).await.unwrap();

        gateway.shutdown().await;
        assert!(!gateway.is_available());
        assert!(gateway.call_tool(&invocation("get_issue", json!({}))).await.is_err());
    }

    #[test]
    fn from_config_uses_timeouts_and_args() {
        let config = ToolProviderConfig {
            label: "Tracker".into(),
            command: "tracker-mcp".into(),
            args: vec!["--stdio".into()],
            handshake_timeout_secs: 5,
            call_timeout_secs: 9,
            ..ToolProviderConfig::default()
        };
        let gateway = McpGateway::from_config(&config);
        assert_eq!(gateway.name(), "Tracker");
        assert_eq!(gateway.args, vec!["--stdio"]);
        assert_eq!(gateway.handshake_timeout, Duration::from_secs(5));
        assert_eq!(gateway.call_timeout, Duration::from_secs(9));
    }
}
