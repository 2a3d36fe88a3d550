//! `tracebot status`: configuration summary plus a tool provider probe.

use std::path::Path;

use tracebot_config::AppConfig;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🔎 tracebot Status");
    println!("==================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Model:        {}", config.llm.model);
    println!("  Max tokens:   {}", config.llm.max_tokens);
    println!("  Iterations:   {}", config.agent.max_iterations);
    println!(
        "  Memory:       {} turns, {} min",
        config.memory.capacity, config.memory.retention_minutes
    );
    println!("  Prefix:       {}", config.discord.command_prefix);
    println!(
        "  Guild:        {}",
        config.discord.guild_id.as_deref().unwrap_or("any")
    );
    println!("  Discord:      {}", configured(config.discord.bot_token.is_some()));
    println!("  Anthropic:    {}", configured(config.llm.api_key.is_some()));

    let gateway = super::build_gateway(&config);
    println!();
    match gateway.initialize().await {
        Ok(()) => {
            let tools = gateway.list_tools()?;
            println!("  ✅ Connected to {} with {} tools", gateway.name(), tools.len());
            for tool in &tools {
                println!("     - {}", tool.name);
            }
        }
        Err(e) => println!("  ❌ Not connected to {}: {e}", gateway.name()),
    }
    gateway.shutdown().await;

    Ok(())
}

fn configured(present: bool) -> &'static str {
    if present { "configured" } else { "missing" }
}
