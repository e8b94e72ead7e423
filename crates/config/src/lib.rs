//! Configuration loading, validation, and management for Quarry.
//!
//! Loads configuration from `~/.quarry/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.quarry/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Name reported by the model provider
    #[serde(default = "default_provider_name")]
    pub provider_name: String,

    /// Base URL of the OpenAI-compatible model endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max output tokens per model invocation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Orchestration engine settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Remote tool service
    #[serde(default)]
    pub tool_service: ToolServiceConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}

/// Redact a secret string for Debug output.
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
            .field("provider_name", &self.provider_name)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("orchestrator", &self.orchestrator)
            .field("tool_service", &self.tool_service)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// Budgets and strategies for the iteration controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Iteration cap for simple queries
    #[serde(default = "default_max_iterations_simple")]
    pub max_iterations_simple: u32,

    /// Iteration cap for analytical queries
    #[serde(default = "default_max_iterations_analytical")]
    pub max_iterations_analytical: u32,

    /// Record-limit hint offered on the first iteration
    #[serde(default = "default_initial_record_limit")]
    pub initial_record_limit: u64,

    /// Growth factor of the record-limit hint per iteration
    #[serde(default = "default_limit_multiplier")]
    pub limit_multiplier: f64,

    /// Ceiling on the record-limit hint
    #[serde(default = "default_max_record_limit")]
    pub max_record_limit: u64,

    /// Below this many records a result is classified as limited
    #[serde(default = "default_min_data_threshold")]
    pub min_data_threshold: u64,

    /// Array items kept per result when compacting data for the model
    #[serde(default = "default_max_records_in_context")]
    pub max_records_in_context: usize,

    /// Stop offering tools once this many records have been gathered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_records: Option<u64>,

    /// Wall-clock budget for a whole run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_run_secs: Option<u64>,

    /// Per-call timeout for tool execution
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Capacity of the per-run event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Failed/empty guidance carries no suggestions beyond the unavailability notice
    #[serde(default = "default_true")]
    pub strict_guidance: bool,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub query_mode: QueryModeConfig,
}

fn default_max_iterations_simple() -> u32 {
    5
}
fn default_max_iterations_analytical() -> u32 {
    10
}
fn default_initial_record_limit() -> u64 {
    50
}
fn default_limit_multiplier() -> f64 {
    2.0
}
fn default_max_record_limit() -> u64 {
    1000
}
fn default_min_data_threshold() -> u64 {
    3
}
fn default_max_records_in_context() -> usize {
    50
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_event_buffer() -> usize {
    64
}
fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations_simple: default_max_iterations_simple(),
            max_iterations_analytical: default_max_iterations_analytical(),
            initial_record_limit: default_initial_record_limit(),
            limit_multiplier: default_limit_multiplier(),
            max_record_limit: default_max_record_limit(),
            min_data_threshold: default_min_data_threshold(),
            max_records_in_context: default_max_records_in_context(),
            max_total_records: None,
            max_run_secs: None,
            tool_timeout_secs: default_tool_timeout_secs(),
            event_buffer: default_event_buffer(),
            strict_guidance: true,
            context: ContextConfig::default(),
            query_mode: QueryModeConfig::default(),
        }
    }
}

/// Bounds applied by the context compactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// History is capped at `max_exchanges * 2` turns
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,

    /// Absolute serialized-size ceiling for the working context
    #[serde(default = "default_hard_ceiling_bytes")]
    pub hard_ceiling_bytes: usize,
}

fn default_max_exchanges() -> usize {
    10
}
fn default_hard_ceiling_bytes() -> usize {
    200_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_exchanges: default_max_exchanges(),
            hard_ceiling_bytes: default_hard_ceiling_bytes(),
        }
    }
}

/// Rule deciding whether an incoming message is analytical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryModeConfig {
    /// Any of these words (case-insensitive) marks a message as analytical
    #[serde(default = "default_analytical_keywords")]
    pub analytical_keywords: Vec<String>,

    /// Messages with at least this many words are analytical
    #[serde(default = "default_analytical_min_words")]
    pub analytical_min_words: usize,
}

fn default_analytical_keywords() -> Vec<String> {
    [
        "analyze",
        "analyse",
        "analysis",
        "compare",
        "comparison",
        "trend",
        "trends",
        "why",
        "breakdown",
        "correlate",
        "correlation",
        "forecast",
        "growth",
        "versus",
        "vs",
        "over time",
        "year over year",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_analytical_min_words() -> usize {
    25
}

impl Default for QueryModeConfig {
    fn default() -> Self {
        Self {
            analytical_keywords: default_analytical_keywords(),
            analytical_min_words: default_analytical_min_words(),
        }
    }
}

/// Where the remote tool service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServiceConfig {
    #[serde(default = "default_tool_service_url")]
    pub url: String,

    /// HTTP client timeout; should exceed `orchestrator.tool_timeout_secs`
    #[serde(default = "default_tool_service_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tool_service_url() -> String {
    "http://127.0.0.1:8700".into()
}
fn default_tool_service_timeout_secs() -> u64 {
    60
}

impl Default for ToolServiceConfig {
    fn default() -> Self {
        Self {
            url: default_tool_service_url(),
            timeout_secs: default_tool_service_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42700
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.quarry/config.toml).
    ///
    /// Environment overrides:
    /// - `QUARRY_API_KEY`, then `OPENAI_API_KEY` (when no key is configured)
    /// - `QUARRY_MODEL`
    /// - `QUARRY_TOOL_SERVICE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("QUARRY_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("QUARRY_MODEL") {
            config.model = model;
        }

        if let Ok(url) = std::env::var("QUARRY_TOOL_SERVICE_URL") {
            config.tool_service.url = url;
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".quarry")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let orch = &self.orchestrator;
        if orch.max_iterations_simple == 0 || orch.max_iterations_analytical == 0 {
            return Err(ConfigError::ValidationError(
                "iteration bounds must be at least 1".into(),
            ));
        }

        if orch.limit_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "limit_multiplier must be >= 1.0".into(),
            ));
        }

        if orch.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be > 0".into(),
            ));
        }

        if orch.context.hard_ceiling_bytes < 1024 {
            return Err(ConfigError::ValidationError(
                "context.hard_ceiling_bytes must be at least 1024".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider_name: default_provider_name(),
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            orchestrator: OrchestratorConfig::default(),
            tool_service: ToolServiceConfig::default(),
            gateway: GatewayConfig::default(),
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
