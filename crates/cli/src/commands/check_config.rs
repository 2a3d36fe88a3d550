//! `tracebot check-config`: validate configuration.

use std::path::Path;

use tracebot_config::AppConfig;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("{config:#?}");

    let path = config_path.map_or_else(AppConfig::default_path, Path::to_path_buf);
    if !path.exists() {
        println!();
        println!("   No config file at {}. Defaults in use; a starting point:", path.display());
        println!();
        println!("{}", AppConfig::default_toml());
    }
    Ok(())
}

/// Problems that do not stop loading but will stop or degrade `run`.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings: Vec<String> = config
        .missing_required()
        .into_iter()
        .map(|name| format!("{name} is not set"))
        .collect();

    let tools = &config.tool_provider;
    if tools.enabled && tools.args.is_empty() && tools.access_token.is_none() {
        warnings.push(format!(
            "SENTRY_AUTH_TOKEN is not set; {} tools will likely fail to start",
            tools.label
        ));
    }
    if !tools.enabled {
        warnings.push(format!("{} tools are disabled", tools.label));
    }
    warnings
}
