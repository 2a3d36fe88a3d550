//! The message bridge: one inbound chat message in, zero or more replies out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracebot_agent::ConversationLoop;
use tracebot_channels::ResponseDispatcher;
use tracebot_core::channel::{Channel, InboundMessage};
use tracebot_core::error::ChannelError;
use tracebot_core::event::{DomainEvent, EventBus};
use tracebot_core::memory::ConversationStore;
use tracing::{debug, info, warn};

use crate::command::Command;

/// Question used when a mention carries no text.
pub const GREETING: &str = "Hello!";

/// How often the typing indicator is re-sent while a question runs.
const TYPING_REFRESH: Duration = Duration::from_secs(8);

const MEMORY_CLEARED_REPLY: &str = "🧠 Conversation memory cleared!";

/// Settings for message routing.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Only this guild is served; `None` serves every guild
    pub guild_id: Option<String>,
    pub command_prefix: String,
    pub system_prompt: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            guild_id: None,
            command_prefix: "!".into(),
            system_prompt: None,
        }
    }
}

/// What `handle` did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Sent by this bot or another bot
    OwnOrBotMessage,
    /// Posted in a guild other than the configured one
    OtherGuild,
    /// Prefixed, but not a known command
    UnknownCommand,
    /// Neither a command, a mention nor a direct message
    NotAddressed,
    /// A command ran
    Command(Command),
    /// A mention or direct message was answered
    AutoReply,
}

/// Routes normalized inbound messages to commands and the conversation loop.
pub struct Bridge {
    agent: Arc<ConversationLoop>,
    channel: Arc<dyn Channel>,
    dispatcher: ResponseDispatcher,
    settings: BridgeSettings,
    event_bus: Arc<EventBus>,
}

impl Bridge {
    pub fn new(
        agent: Arc<ConversationLoop>,
        channel: Arc<dyn Channel>,
        dispatcher: ResponseDispatcher,
        settings: BridgeSettings,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            agent,
            channel,
            dispatcher,
            settings,
            event_bus,
        }
    }

    /// Handle one inbound message. Errors are outbound send failures only;
    /// everything else ends up as a reply.
    pub async fn handle(&self, message: &InboundMessage) -> Result<Disposition, ChannelError> {
        let bot_id = self.channel.bot_user_id();

        if message.author_is_bot || bot_id.as_deref() == Some(message.author_id.as_str()) {
            return Ok(Disposition::OwnOrBotMessage);
        }

        if let (Some(expected), Some(actual)) = (&self.settings.guild_id, &message.guild_id)
            && expected != actual
        {
            info!(
                author = message.author_name.as_deref().unwrap_or(&message.author_id),
                guild_id = %actual,
                server_id = %expected,
                "Message from another guild ignored"
            );
            return Ok(Disposition::OtherGuild);
        }

        let prefix = self.settings.command_prefix.as_str();
        if message.content.starts_with(prefix) {
            let Some(command) = Command::parse(&message.content, prefix) else {
                debug!(content = %message.content, "Unknown command");
                return Ok(Disposition::UnknownCommand);
            };
            self.publish_received(message);
            self.run_command(message, &command).await?;
            return Ok(Disposition::Command(command));
        }

        if !(message.mentions_bot || message.is_direct) {
            return Ok(Disposition::NotAddressed);
        }

        self.publish_received(message);
        let content = strip_mention(&message.content, bot_id.as_deref());
        let question = if content.is_empty() {
            GREETING
        } else {
            content.as_str()
        };
        let reply = self.ask(message, question).await;
        self.dispatcher
            .dispatch(
                self.channel.as_ref(),
                &message.channel_id,
                &reply,
                Some(&message.message_id),
            )
            .await?;
        Ok(Disposition::AutoReply)
    }

    async fn run_command(
        &self,
        message: &InboundMessage,
        command: &Command,
    ) -> Result<(), ChannelError> {
        let key = message.conversation_key();
        let reply = match command {
            Command::Ask(question) if question.is_empty() => {
                format!("Usage: {}ask <question>", self.settings.command_prefix)
            }
            Command::Ask(question) => self.ask(message, question).await,
            Command::Forget => {
                self.agent.memory().clear(&key).await;
                MEMORY_CLEARED_REPLY.to_string()
            }
            Command::Memory => {
                let count = self.agent.memory().count(&key).await;
                format!("💭 I remember {count} messages from our conversation")
            }
            Command::Status => self.status_reply(),
        };

        self.dispatcher
            .dispatch(self.channel.as_ref(), &message.channel_id, &reply, None)
            .await?;
        Ok(())
    }

    /// Run the conversation loop behind a typing indicator. Discord drops
    /// the indicator after about ten seconds, so it is re-sent until the
    /// loop finishes.
    async fn ask(&self, message: &InboundMessage, question: &str) -> String {
        let key = message.conversation_key();
        let run = self
            .agent
            .run(&key, question, self.settings.system_prompt.as_deref());
        tokio::pin!(run);

        let mut typing = tokio::time::interval(TYPING_REFRESH);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = typing.tick() => {
                    if let Err(e) = self.channel.send_typing(&message.channel_id).await {
                        warn!(error = %e, "Failed to send typing indicator");
                    }
                }
                outcome = &mut run => break outcome,
            }
        };
        info!(
            conversation_key = %key,
            termination = ?outcome.termination,
            iterations = outcome.iterations,
            tool_calls = outcome.tool_calls,
            "Answered question"
        );
        outcome.reply
    }

    fn status_reply(&self) -> String {
        let gateway = self.agent.gateway();
        let tools = gateway
            .is_available()
            .then(|| gateway.list_tools().ok())
            .flatten();
        match tools {
            Some(tools) => format!(
                "✅ Connected to {} with {} tools available",
                gateway.name(),
                tools.len()
            ),
            None => format!("❌ Not connected to {}", gateway.name()),
        }
    }

    fn publish_received(&self, message: &InboundMessage) {
        self.event_bus.publish(DomainEvent::MessageReceived {
            channel_id: message.channel_id.clone(),
            author_id: message.author_id.clone(),
            content_preview: message.content.chars().take(80).collect(),
            timestamp: Utc::now(),
        });
    }
}

/// Remove `<@id>` and `<@!id>` mentions of the bot and trim.
fn strip_mention(content: &str, bot_id: Option<&str>) -> String {
    match bot_id {
        Some(id) => content
            .replace(&format!("<@{id}>"), "")
            .replace(&format!("<@!{id}>"), "")
            .trim()
            .to_string(),
        None => content.trim().to_string(),
    }
}
