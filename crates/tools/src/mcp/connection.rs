//! One JSON-RPC connection to an MCP server.
//!
//! Messages are newline-delimited JSON. Requests are serialized through a
//! single lock, so a response is always read by the request that is waiting
//! for it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{message} (code: {code})")]
    Server { code: i64, message: String },

    #[error("No response to `{method}` within {timeout_secs}s")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("Connection closed")]
    Closed,
}

struct Io {
    writer: BoxedWriter,
    lines: Lines<BufReader<BoxedReader>>,
}

pub struct McpConnection {
    io: Mutex<Option<Io>>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
}

impl McpConnection {
    /// Launch the server process with piped stdio. The child is killed when
    /// the connection is dropped.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdout".into()))?;

        let mut connection = Self::from_streams(stdout, stdin);
        *connection.child.get_mut() = Some(child);
        Ok(connection)
    }

    /// Wrap an already-open stream pair (in-process servers, tests).
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        Self {
            io: Mutex::new(Some(Io {
                writer: Box::new(writer),
                lines: BufReader::new(reader).lines(),
            })),
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })
        .map_err(|e| McpError::Protocol(e.to_string()))?;

        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(McpError::Closed)?;

        let mut written = false;
        let exchange = async {
            write_line(&mut io.writer, &line).await?;
            written = true;
            read_response(&mut io.lines, id).await
        };

        let message = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(method, id, "MCP request timed out");
                // A partial line on the server's stdin would corrupt every
                // later request.
                if !written {
                    warn!(method, id, "Write did not finish, closing MCP connection");
                    *guard = None;
                }
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        if let Some(error) = message.error {
            return Err(McpError::Server {
                code: error.code,
                message: error.message,
            });
        }
        message
            .result
            .ok_or_else(|| McpError::Protocol(format!("Missing result for `{method}`")))
    }

    /// Send a notification (no response).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        })
        .map_err(|e| McpError::Protocol(e.to_string()))?;

        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(McpError::Closed)?;
        write_line(&mut io.writer, &line).await
    }

    /// Close stdin and stop the child process.
    pub async fn close(&self) {
        if let Some(mut io) = self.io.lock().await.take() {
            let _ = io.writer.shutdown().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> Result<(), McpError> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| McpError::Transport(e.to_string()))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| McpError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| McpError::Transport(e.to_string()))
}

/// Read until the response with `id`. Server notifications, server requests,
/// stale responses and non-JSON output are skipped.
async fn read_response(
    lines: &mut Lines<BufReader<BoxedReader>>,
    id: u64,
) -> Result<JsonRpcMessage, McpError> {
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?
            .ok_or(McpError::Closed)?;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: JsonRpcMessage = match serde_json::from_str(trimmed) {
            Ok(m) => m,
            Err(_) => {
                debug!(line = %trimmed, "Skipping non-JSON output from MCP server");
                continue;
            }
        };

        if message.method.is_some() {
            debug!(method = ?message.method, "Ignoring server-initiated message");
            continue;
        }
        match message.id.as_ref().and_then(serde_json::Value::as_u64) {
            Some(got) if got == id => return Ok(message),
            other => debug!(expected = id, got = ?other, "Skipping unrelated response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Echo server: answers every request with its own params, after first
    /// writing some noise.
    fn echo_server() -> McpConnection {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: serde_json::Value = serde_json::from_str(&line).unwrap();
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };
                let noise = [
                    "starting up...".to_string(),
                    json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}})
                        .to_string(),
                    json!({"jsonrpc": "2.0", "id": 9999, "result": {}}).to_string(),
                ];
                for n in noise {
                    server_write.write_all(format!("{n}\n").as_bytes()).await.unwrap();
                }
                let reply = if msg["method"] == "fail" {
                    json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}})
                } else {
                    json!({"jsonrpc": "2.0", "id": id, "result": msg["params"]})
                };
                server_write
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .unwrap();
            }
        });

        McpConnection::from_streams(client_read, client_write)
    }

    #[tokio::test]
    async fn request_skips_noise_and_matches_id() {
        let conn = echo_server();
        let result = conn
            .request("echo", Some(json!({"n": 1})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result["n"], 1);

        let second = conn
            .request("echo", Some(json!({"n": 2})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(second["n"], 2);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let conn = echo_server();
        let err = conn
            .request("fail", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            McpError::Server { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client, _server) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(client);
        let conn = McpConnection::from_streams(r, w);

        let err = conn
            .request("tools/list", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
    }

    #[tokio::test]
    async fn read_timeout_keeps_connection_open() {
        let (client, _server) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(client);
        let conn = McpConnection::from_streams(r, w);

        for _ in 0..2 {
            let err = conn
                .request("ping", None, Duration::from_millis(50))
                .await
                .unwrap_err();
            assert!(matches!(err, McpError::Timeout { .. }));
        }
    }

    #[tokio::test]
    async fn stalled_write_closes_connection() {
        // the peer never reads, so a line longer than the pipe never flushes
        let (client, _server) = tokio::io::duplex(16);
        let (r, w) = tokio::io::split(client);
        let conn = McpConnection::from_streams(r, w);

        let err = conn
            .request(
                "tools/call",
                Some(json!({"name": "x".repeat(256)})),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));

        let err = conn
            .request("ping", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Closed));
    }

    #[tokio::test]
    async fn closed_connection_rejects_requests() {
        let conn = echo_server();
        conn.close().await;
        let err = conn
            .request("echo", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Closed));
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let result = McpConnection::spawn(
            "tracebot-definitely-not-a-real-binary",
            &[],
            &HashMap::new(),
        );
        assert!(matches!(result, Err(McpError::Spawn { .. })));
    }
}
