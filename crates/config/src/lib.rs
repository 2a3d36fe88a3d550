//! Configuration loading, validation, and management for tracebot.
//!
//! Loads configuration from `~/.tracebot/config.toml` (or an explicit path),
//! then applies `.env` and environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default system prompt for the issue-tracker assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that can answer questions about Sentry data. \
You are also able to use the tools provided to you to answer questions.\n\n\
For your final response, assume the user is a technically minded, experienced software engineer. \
Be friendly and supportive: they might be stressed or frustrated as they are dealing with a bug or issue.\n\n\
If the user gives you a Sentry issue id, use it to work out which project the issue is about. \
The format of an issue id is \"PROJECT_NAME-ISSUE\" (e.g. PROJ-123), so the project name is the part \
before the last dash when you use the tools to look up information.";

/// The root configuration structure.
///
/// Maps directly to `~/.tracebot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Discord connection and command settings
    #[serde(default)]
    pub discord: DiscordConfig,

    /// LLM provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// External tool provider process
    #[serde(default)]
    pub tool_provider: ToolProviderConfig,

    /// Conversation memory limits
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Conversation loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token (`DISCORD_BOT_TOKEN`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Only messages from this guild are handled (`DISCORD_SERVER_ID`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    /// Prefix that marks a command
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Maximum characters per outbound message
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

fn default_command_prefix() -> String {
    "!".into()
}
fn default_message_limit() -> usize {
    2000
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: None,
            command_prefix: default_command_prefix(),
            message_limit: default_message_limit(),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("guild_id", &self.guild_id)
            .field("command_prefix", &self.command_prefix)
            .field("message_limit", &self.message_limit)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Anthropic API key (`ANTHROPIC_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the API base URL (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".into()
}
fn default_max_tokens() -> u32 {
    1000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ToolProviderConfig {
    /// When false the bot runs without tools
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name shown in status replies
    #[serde(default = "default_label")]
    pub label: String,

    /// Executable that serves the tool protocol on stdio
    #[serde(default = "default_command")]
    pub command: String,

    /// Explicit arguments; empty means the Sentry server defaults
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the child process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Sentry access token (`SENTRY_AUTH_TOKEN`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Sentry host (`SENTRY_HOST`)
    #[serde(default = "default_sentry_host")]
    pub host: String,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_label() -> String {
    "Sentry".into()
}
fn default_command() -> String {
    "npx".into()
}
fn default_sentry_host() -> String {
    "sentry.io".into()
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_call_timeout() -> u64 {
    120
}

impl ToolProviderConfig {
    /// Arguments passed to the provider process.
    pub fn resolved_args(&self) -> Vec<String> {
        if !self.args.is_empty() {
            return self.args.clone();
        }
        vec![
            "@sentry/mcp-server@latest".into(),
            format!(
                "--access-token={}",
                self.access_token.as_deref().unwrap_or_default()
            ),
            format!("--host={}", self.host),
        ]
    }
}

impl Default for ToolProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            label: default_label(),
            command: default_command(),
            args: vec![],
            env: HashMap::new(),
            access_token: None,
            host: default_sentry_host(),
            handshake_timeout_secs: default_handshake_timeout(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl std::fmt::Debug for ToolProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProviderConfig")
            .field("enabled", &self.enabled)
            .field("label", &self.label)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("access_token", &redact(&self.access_token))
            .field("host", &self.host)
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Turns kept per conversation
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Minutes before a turn expires
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: i64,
}

/// One year.
pub const MAX_RETENTION_MINUTES: i64 = 365 * 24 * 60;

fn default_capacity() -> usize {
    10
}
fn default_retention_minutes() -> i64 {
    120
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            retention_minutes: default_retention_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// LLM queries allowed per user request
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> usize {
    10
}

impl AgentConfig {
    pub fn effective_system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or `~/.tracebot/config.toml` when
    /// `None`.
    ///
    /// A `.env` file in the working directory is loaded first, then these
    /// environment variables override the file:
    /// - `DISCORD_BOT_TOKEN`, `DISCORD_SERVER_ID`
    /// - `ANTHROPIC_API_KEY`, `TRACEBOT_MODEL`
    /// - `SENTRY_AUTH_TOKEN`, `SENTRY_HOST`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(dotenv_path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", dotenv_path.display());
        }

        let default_path = Self::default_path();
        Self::load_with(path.unwrap_or(&default_path), |key| std::env::var(key).ok())
    }

    /// Read `path`, apply overrides from `lookup`, then validate.
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    /// `~/.tracebot/config.toml`
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = Some(token);
        }
        if let Some(guild) = get("DISCORD_SERVER_ID") {
            self.discord.guild_id = Some(guild.trim().to_string());
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = get("TRACEBOT_MODEL") {
            self.llm.model = model;
        }
        if let Some(token) = get("SENTRY_AUTH_TOKEN") {
            self.tool_provider.access_token = Some(token);
        }
        if let Some(host) = get("SENTRY_HOST") {
            self.tool_provider.host = host;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tracebot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "memory.capacity must be at least 1".into(),
            ));
        }
        if !(1..=MAX_RETENTION_MINUTES).contains(&self.memory.retention_minutes) {
            return Err(ConfigError::ValidationError(format!(
                "memory.retention_minutes must be between 1 and {MAX_RETENTION_MINUTES}"
            )));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.discord.message_limit == 0 || self.discord.message_limit > 2000 {
            return Err(ConfigError::ValidationError(
                "discord.message_limit must be between 1 and 2000".into(),
            ));
        }
        if self.discord.command_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "discord.command_prefix must not be empty".into(),
            ));
        }
        if let Some(t) = self.llm.temperature
            && !(0.0..=1.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Settings the `run` command cannot start without.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.discord.bot_token.is_none() {
            missing.push("DISCORD_BOT_TOKEN");
        }
        if self.llm.api_key.is_none() {
            missing.push("ANTHROPIC_API_KEY");
        }
        missing
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discord.command_prefix, "!");
        assert_eq!(config.llm.model, "claude-3-5-sonnet-20241022");
        assert_eq!(config.llm.max_tokens, 1000);
        assert_eq!(config.memory.capacity, 10);
        assert_eq!(config.memory.retention_minutes, 120);
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.tool_provider.label, "Sentry");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.discord.message_limit, 2000);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_with(Path::new("/nonexistent/config.toml"), no_env).unwrap();
        assert_eq!(config.memory.capacity, 10);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[discord]
guild_id = "1234"
command_prefix = "?"

[llm]
model = "claude-3-haiku-20240307"
max_tokens = 500

[memory]
capacity = 4
retention_minutes = 30

[tool_provider]
label = "Tracker"
command = "tracker-mcp"
args = ["--stdio"]
"#
        )
        .unwrap();

        let config = AppConfig::load_with(file.path(), no_env).unwrap();
        assert_eq!(config.discord.guild_id.as_deref(), Some("1234"));
        assert_eq!(config.discord.command_prefix, "?");
        assert_eq!(config.llm.max_tokens, 500);
        assert_eq!(config.memory.capacity, 4);
        assert_eq!(config.tool_provider.resolved_args(), vec!["--stdio"]);
        assert_eq!(config.agent.max_iterations, 10);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[memory\ncapacity = ").unwrap();
        assert!(matches!(
            AppConfig::load_with(file.path(), no_env),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn huge_retention_rejected_at_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[memory]\nretention_minutes = 9223372036854775807").unwrap();
        assert!(matches!(
            AppConfig::load_with(file.path(), no_env),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn retention_bounds() {
        let mut config = AppConfig::default();
        config.memory.retention_minutes = 0;
        assert!(config.validate().is_err());
        config.memory.retention_minutes = MAX_RETENTION_MINUTES;
        assert!(config.validate().is_ok());
        config.memory.retention_minutes = MAX_RETENTION_MINUTES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_with_applies_overrides_before_validating() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\nmodel = \"from-file\"").unwrap();
        let config = AppConfig::load_with(file.path(), |key| {
            (key == "TRACEBOT_MODEL").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(config.llm.model, "from-env");
    }

    #[test]
    fn default_toml_parses_back() {
        let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.memory.retention_minutes, 120);
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = AppConfig::default();
        config.memory.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_message_limit_rejected() {
        let mut config = AppConfig::default();
        config.discord.message_limit = 4000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        config.discord.guild_id = Some("from-file".into());

        let env: HashMap<&str, &str> = [
            ("DISCORD_BOT_TOKEN", "discord-token"),
            ("DISCORD_SERVER_ID", " 42 "),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("SENTRY_AUTH_TOKEN", "sntrys_abc"),
            ("SENTRY_HOST", ""),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.discord.bot_token.as_deref(), Some("discord-token"));
        assert_eq!(config.discord.guild_id.as_deref(), Some("42"));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant"));
        // empty value keeps the default
        assert_eq!(config.tool_provider.host, "sentry.io");
        assert!(config.missing_required().is_empty());
    }

    #[test]
    fn default_args_launch_sentry_server() {
        let config = ToolProviderConfig {
            access_token: Some("sntrys_abc".into()),
            host: "sentry.example.com".into(),
            ..ToolProviderConfig::default()
        };
        assert_eq!(
            config.resolved_args(),
            vec![
                "@sentry/mcp-server@latest",
                "--access-token=sntrys_abc",
                "--host=sentry.example.com",
            ]
        );
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.discord.bot_token = Some("discord-secret".into());
        config.llm.api_key = Some("sk-ant-secret".into());
        config.tool_provider.access_token = Some("sntrys-secret".into());

        let debug = format!("{config:?}");
        assert!(!debug.contains("discord-secret"));
        assert!(!debug.contains("sk-ant-secret"));
        assert!(!debug.contains("sntrys-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn missing_required_lists_secrets() {
        let config = AppConfig::default();
        assert_eq!(
            config.missing_required(),
            vec!["DISCORD_BOT_TOKEN", "ANTHROPIC_API_KEY"]
        );
    }

    #[test]
    fn system_prompt_override() {
        let mut agent = AgentConfig::default();
        assert!(agent.effective_system_prompt().contains("PROJECT_NAME-ISSUE"));
        agent.system_prompt = Some("Be brief".into());
        assert_eq!(agent.effective_system_prompt(), "Be brief");
    }
}
