//! Configuration loading, validation, and management for fundwise.
//!
//! Loads configuration from `~/.fundwise/config.toml` (or `$FUNDWISE_CONFIG`)
//! with environment variable overrides. Validates all settings at startup.

use fundwise_core::KnownTool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.fundwise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Anthropic API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used for every round
    #[serde(default = "default_model")]
    pub model: String,

    /// Messages API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Max tokens per backend response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// System instructions sent with every round
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Remote tool endpoints, keyed by tool identifier
    #[serde(default)]
    pub tools: BTreeMap<String, ToolEndpointConfig>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}
fn default_system_prompt() -> String {
    "You are the fundwise assistant. Answer questions about funds, securities and \
     fund documents. Use the available tools when you need facts, and cite your sources."
        .into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("system_prompt_chars", &self.system_prompt.len())
            .field("orchestrator", &self.orchestrator)
            .field("retry", &self.retry)
            .field("gateway", &self.gateway)
            .field("telemetry", &self.telemetry)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Bounds for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum backend calls per session
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Overall deadline for a session
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Upper bound for a single tool call (further capped by the session deadline)
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Texts longer than this are truncated before reaching the backend
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Capacity of the per-session record channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_rounds() -> u32 {
    5
}
fn default_session_timeout() -> u64 {
    120
}
fn default_tool_timeout() -> u64 {
    45
}
fn default_max_text_chars() -> usize {
    24_000
}
fn default_event_buffer() -> usize {
    128
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            session_timeout_secs: default_session_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            max_text_chars: default_max_text_chars(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl OrchestratorConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Backoff for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    8_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Request body limit; attachments arrive inline as base64
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// CORS origins; empty means any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    25 * 1024 * 1024
}
fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records beyond this many in flight are dropped, never awaited
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How many recent sessions `/v1/usage` keeps
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_recent_capacity() -> usize {
    50
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: default_queue_capacity(),
            recent_capacity: default_recent_capacity(),
        }
    }
}

/// Where a remote tool lives.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolEndpointConfig {
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for ToolEndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEndpointConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from `$FUNDWISE_CONFIG` or `~/.fundwise/config.toml`.
    ///
    /// Environment overrides (highest priority):
    /// - `FUNDWISE_API_KEY`, then `ANTHROPIC_API_KEY`
    /// - `FUNDWISE_MODEL`
    /// - `FUNDWISE_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("FUNDWISE_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("FUNDWISE_MODEL") {
            self.model = model;
        }
        if let Some(base_url) = lookup("FUNDWISE_BASE_URL") {
            self.base_url = base_url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".fundwise")
    }

    pub fn config_path() -> PathBuf {
        std::env::var("FUNDWISE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.orchestrator.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_rounds must be at least 1".into(),
            ));
        }
        if self.orchestrator.session_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.session_timeout_secs must be > 0".into(),
            ));
        }
        if self.orchestrator.max_text_chars < 256 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_text_chars must be at least 256".into(),
            ));
        }
        if self.orchestrator.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.event_buffer must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        for name in self.tools.keys() {
            if KnownTool::parse(name).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "unknown tool '{name}' in [tools]"
                )));
            }
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Configured endpoint for a known tool, if any.
    pub fn tool_endpoint(&self, tool: KnownTool) -> Option<&ToolEndpointConfig> {
        self.tools.get(tool.as_str())
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            orchestrator: OrchestratorConfig::default(),
            retry: RetryConfig::default(),
            gateway: GatewayConfig::default(),
            telemetry: TelemetryConfig::default(),
            tools: BTreeMap::new(),
        }
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
