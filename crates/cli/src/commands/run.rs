//! `tracebot run`: connect everything and serve Discord until Ctrl-C.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracebot_agent::ConversationLoop;
use tracebot_bot::{Bridge, BridgeSettings};
use tracebot_channels::{DiscordChannel, ResponseDispatcher};
use tracebot_config::AppConfig;
use tracebot_core::channel::Channel;
use tracebot_core::event::{DomainEvent, EventBus};
use tracebot_memory::InMemoryStore;
use tracebot_providers::AnthropicProvider;
use tracing::{debug, error, info, warn};

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let missing = config.missing_required();
    if !missing.is_empty() {
        return Err(format!("Missing required settings: {}", missing.join(", ")).into());
    }

    println!("🔎 tracebot starting");
    println!("   Model:    {}", config.llm.model);
    println!("   Tools:    {}", config.tool_provider.label);
    println!(
        "   Guild:    {}",
        config.discord.guild_id.as_deref().unwrap_or("any")
    );

    let provider = Arc::new(AnthropicProvider::from_config(&config.llm)?);

    let gateway = super::build_gateway(&config);
    match gateway.initialize().await {
        Ok(()) => {
            let tools = gateway.list_tools().map(|t| t.len()).unwrap_or(0);
            info!(gateway = gateway.name(), tools, "Tool gateway ready");
        }
        Err(e) => warn!(
            gateway = gateway.name(),
            error = %e,
            "Tool gateway unavailable, answering without tools"
        ),
    }

    let retention = chrono::Duration::try_minutes(config.memory.retention_minutes)
        .ok_or("memory.retention_minutes is out of range")?;
    let memory = Arc::new(InMemoryStore::with_limits(config.memory.capacity, retention));

    let event_bus = Arc::new(EventBus::default());
    spawn_event_logger(&event_bus);

    let agent = Arc::new(
        ConversationLoop::new(
            provider,
            Arc::clone(&gateway),
            memory,
            config.llm.model.clone(),
            Arc::clone(&event_bus),
        )
        .with_max_iterations(config.agent.max_iterations)
        .with_max_tokens(config.llm.max_tokens)
        .with_temperature(config.llm.temperature),
    );

    let token = config.discord.bot_token.clone().unwrap_or_default();
    let channel: Arc<dyn Channel> = Arc::new(DiscordChannel::new(token));
    let mut inbound = channel.start().await?;

    let bridge = Arc::new(Bridge::new(
        agent,
        Arc::clone(&channel),
        ResponseDispatcher::new(config.discord.message_limit),
        BridgeSettings {
            guild_id: config.discord.guild_id.clone(),
            command_prefix: config.discord.command_prefix.clone(),
            system_prompt: Some(config.agent.effective_system_prompt().to_string()),
        },
        event_bus,
    ));

    info!("Listening for messages (Ctrl-C to stop)");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            received = inbound.recv() => {
                match received {
                    Some(Ok(message)) => {
                        let bridge = Arc::clone(&bridge);
                        tokio::spawn(async move {
                            if let Err(e) = bridge.handle(&message).await {
                                error!(
                                    channel_id = %message.channel_id,
                                    error = %e,
                                    "Failed to deliver reply"
                                );
                            }
                        });
                    }
                    Some(Err(e)) => warn!(error = %e, "Discord connection error"),
                    None => {
                        warn!("Discord channel closed");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    gateway.shutdown().await;
    channel.stop().await?;
    println!("👋 tracebot stopped");
    Ok(())
}

/// Mirror domain events into the debug log.
fn spawn_event_logger(event_bus: &EventBus) {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::MessageReceived {
            channel_id,
            author_id,
            content_preview,
            ..
        } => debug!(%channel_id, %author_id, %content_preview, "Message received"),
        DomainEvent::ResponseGenerated {
            conversation_key,
            model,
            tokens_used,
            ..
        } => debug!(%conversation_key, %model, tokens_used, "Response generated"),
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => debug!(%tool_name, success, duration_ms, "Tool executed"),
        DomainEvent::ErrorOccurred {
            context,
            error_message,
            ..
        } => debug!(%context, %error_message, "Error occurred"),
    }
}
