//! Discord channel adapter.
//!
//! Receives through the Gateway WebSocket and sends through the REST API.
//! The gateway task reconnects on its own until the channel is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracebot_core::channel::{Channel, InboundMessage};
use tracebot_core::error::ChannelError;
use tracing::{debug, error, info, warn};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS (1) | GUILD_MESSAGES (512) | DIRECT_MESSAGES (4096) | MESSAGE_CONTENT (32768)
const GATEWAY_INTENTS: u64 = 1 | 512 | 4096 | 32768;

const DEFAULT_HEARTBEAT_MS: u64 = 41_250;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Discord channel adapter.
pub struct DiscordChannel {
    bot_token: String,
    api_base: String,
    client: Client,
    bot_user_id: Arc<RwLock<Option<String>>>,
    running: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DiscordChannel {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: DISCORD_API_BASE.into(),
            client: Client::new(),
            bot_user_id: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Point REST calls somewhere else (proxies, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<(), ChannelError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("Authorization", self.auth_header());
        request = match body {
            Some(body) => request.json(&body),
            None => request.header("Content-Length", "0"),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "discord".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, path, body = %body, "Discord REST call failed");
            return Err(ChannelError::DeliveryFailed {
                channel: "discord".into(),
                reason: format!("HTTP {status}: {body}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        if self.bot_token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "DISCORD_BOT_TOKEN is not set".into(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::NotConfigured(
                "Discord gateway already running".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(256);
        let gateway = GatewayWorker {
            token: self.bot_token.clone(),
            api_base: self.api_base.clone(),
            client: self.client.clone(),
            bot_user_id: Arc::clone(&self.bot_user_id),
            running: Arc::clone(&self.running),
            tx,
        };
        *self.task.lock().await = Some(tokio::spawn(gateway.run()));
        info!("Discord channel started");
        Ok(rx)
    }

    async fn send(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({ "content": content });
        if let Some(message_id) = reply_to {
            body["message_reference"] = json!({
                "message_id": message_id,
                "fail_if_not_exists": false
            });
        }
        debug!(channel_id, reply_to = ?reply_to, len = content.len(), "Discord send");
        self.post(&format!("/channels/{channel_id}/messages"), Some(body))
            .await
    }

    async fn send_typing(&self, channel_id: &str) -> Result<(), ChannelError> {
        self.post(&format!("/channels/{channel_id}/typing"), None)
            .await
    }

    fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Discord channel stopping");
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(!self.bot_token.is_empty() && self.running.load(Ordering::SeqCst))
    }
}

/// Owns the gateway connection for the lifetime of the channel.
struct GatewayWorker {
    token: String,
    api_base: String,
    client: Client,
    bot_user_id: Arc<RwLock<Option<String>>>,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<Result<InboundMessage, ChannelError>>,
}

impl GatewayWorker {
    async fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            match self.session().await {
                Ok(()) => info!("Discord gateway asked for a reconnect"),
                Err(e) => {
                    error!(error = %e, "Discord gateway connection ended");
                    if self.tx.send(Err(e)).await.is_err() {
                        break;
                    }
                }
            }
            if self.tx.is_closed() {
                break;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
        self.running.store(false, Ordering::SeqCst);
        debug!("Discord gateway worker exited");
    }

    async fn gateway_url(&self) -> Result<String, ChannelError> {
        let body: Value = self
            .client
            .get(format!("{}/gateway/bot", self.api_base))
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(format!("gateway lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("gateway lookup: {e}")))?;

        let url = body["url"].as_str().ok_or_else(|| {
            ChannelError::InvalidPayload("missing 'url' in gateway response".into())
        })?;
        Ok(format!("{url}/?v=10&encoding=json"))
    }

    /// One gateway connection. `Ok` means the server asked us to reconnect.
    async fn session(&self) -> Result<(), ChannelError> {
        let url = self.gateway_url().await?;
        info!(url = %url, "Connecting to Discord gateway");

        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let mut sequence: Option<u64> = None;
        let mut heartbeat: Option<tokio::time::Interval> = None;

        loop {
            let frame = match heartbeat.as_mut() {
                Some(interval) => tokio::select! {
                    _ = interval.tick() => {
                        write
                            .send(WsMessage::Text(heartbeat_payload(sequence).to_string().into()))
                            .await
                            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
                        continue;
                    }
                    frame = read.next() => frame,
                },
                None => read.next().await,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(ChannelError::ConnectionLost(e.to_string())),
                None => return Err(ChannelError::ConnectionLost("gateway stream ended".into())),
            };

            let text = match message {
                WsMessage::Text(text) => text,
                WsMessage::Close(frame) => {
                    return Err(ChannelError::ConnectionLost(format!(
                        "gateway closed: {frame:?}"
                    )));
                }
                _ => continue,
            };

            let payload: Value = match serde_json::from_str(text.as_str()) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable gateway frame");
                    continue;
                }
            };

            if let Some(s) = payload["s"].as_u64() {
                sequence = Some(s);
            }

            match payload["op"].as_u64() {
                // Hello
                Some(10) => {
                    let every = payload["d"]["heartbeat_interval"]
                        .as_u64()
                        .unwrap_or(DEFAULT_HEARTBEAT_MS);
                    debug!(heartbeat_ms = every, "Discord hello");
                    heartbeat = Some(tokio::time::interval(Duration::from_millis(every)));
                    write
                        .send(WsMessage::Text(identify_payload(&self.token).to_string().into()))
                        .await
                        .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
                }
                // Heartbeat request
                Some(1) => {
                    write
                        .send(WsMessage::Text(heartbeat_payload(sequence).to_string().into()))
                        .await
                        .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
                }
                // Reconnect / invalid session
                Some(7) | Some(9) => return Ok(()),
                // Dispatch
                Some(0) => self.dispatch(&payload).await?,
                _ => {}
            }
        }
    }

    async fn dispatch(&self, payload: &Value) -> Result<(), ChannelError> {
        match payload["t"].as_str() {
            Some("READY") => {
                if let Some(id) = parse_ready(&payload["d"]) {
                    info!(bot_user_id = %id, "Discord gateway ready");
                    *self.bot_user_id.write().unwrap_or_else(|e| e.into_inner()) = Some(id);
                }
            }
            Some("MESSAGE_CREATE") => {
                let bot_id = self
                    .bot_user_id
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                if let Some(message) = parse_message_create(&payload["d"], bot_id.as_deref()) {
                    self.tx
                        .send(Ok(message))
                        .await
                        .map_err(|_| ChannelError::ConnectionLost("receiver dropped".into()))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": 2,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "tracebot",
                "device": "tracebot"
            }
        }
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": 1, "d": sequence })
}

fn parse_ready(data: &Value) -> Option<String> {
    data["user"]["id"].as_str().map(String::from)
}

/// Normalize a MESSAGE_CREATE payload.
fn parse_message_create(data: &Value, bot_user_id: Option<&str>) -> Option<InboundMessage> {
    let message_id = data["id"].as_str()?;
    let channel_id = data["channel_id"].as_str()?;
    let author = &data["author"];
    let author_id = author["id"].as_str()?;
    let guild_id = data["guild_id"].as_str().map(String::from);

    let mentions_bot = bot_user_id.is_some_and(|bot| {
        data["mentions"]
            .as_array()
            .is_some_and(|m| m.iter().any(|u| u["id"].as_str() == Some(bot)))
    });

    Some(InboundMessage {
        message_id: message_id.into(),
        author_id: author_id.into(),
        author_name: author["username"].as_str().map(String::from),
        author_is_bot: author["bot"].as_bool().unwrap_or(false),
        channel_id: channel_id.into(),
        is_direct: guild_id.is_none(),
        guild_id,
        content: data["content"].as_str().unwrap_or_default().into(),
        mentions_bot,
    })
}
