//! Relay configuration
//!
//! Loaded from YAML; secrets come from the environment (`.env` supported).

use crate::files::FileLimits;
use crate::llm::catalog::{OPENAI_DEFAULT_MODEL, PROVIDER_OPENAI};
use crate::llm::claude::{CLAUDE_API_URL, CLAUDE_API_VERSION};
use crate::llm::openai::OPENAI_API_URL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether::{ConnectionConfig, RetryPolicy};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub client: ChatClientConfig,
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Overridden by `PORT`
    pub port: u16,
    /// Largest inbound WebSocket message in bytes
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_frame_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection resilience settings, in config-file units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub max_reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub outbound_capacity: usize,
    pub breaker_threshold: u32,
    pub breaker_timeout_secs: u64,
    /// Queued messages older than this are discarded on flush
    pub queued_message_ttl_secs: Option<u64>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            ping_interval_secs: 30,
            pong_timeout_secs: 120,
            write_timeout_secs: 45,
            send_timeout_secs: 5,
            outbound_capacity: 256,
            breaker_threshold: 5,
            breaker_timeout_secs: 60,
            queued_message_ttl_secs: None,
        }
    }
}

impl ConnectionSettings {
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            outbound_capacity: self.outbound_capacity,
            breaker_threshold: self.breaker_threshold,
            breaker_timeout: Duration::from_secs(self.breaker_timeout_secs),
            queued_message_ttl: self.queued_message_ttl_secs.map(Duration::from_secs),
        }
    }
}

/// Retry policy for LLM calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_size: usize,
    pub max_total_upload_size: usize,
    pub max_files_per_request: usize,
    /// Deadline for one LLM call
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 5 * 1024 * 1024,
            max_total_upload_size: 50 * 1024 * 1024,
            max_files_per_request: 50,
            request_timeout_secs: 300,
        }
    }
}

impl LimitsConfig {
    pub fn file_limits(&self) -> FileLimits {
        FileLimits {
            max_file_size: self.max_file_size,
            max_total_size: self.max_total_upload_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: OpenAiSettings,
    pub claude: ClaudeSettings,
    pub http_timeout_secs: u64,
    pub breaker_threshold: u32,
    pub breaker_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiSettings::default(),
            claude: ClaudeSettings::default(),
            http_timeout_secs: 90,
            breaker_threshold: 5,
            breaker_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_url: String,
    pub model: String,
    /// From `OPENAI_API_KEY` (not in YAML)
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_url: OPENAI_API_URL.to_string(),
            model: OPENAI_DEFAULT_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeSettings {
    pub api_url: String,
    pub api_version: String,
    /// From `CLAUDEAI_API_KEY` (not in YAML)
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            api_url: CLAUDE_API_URL.to_string(),
            api_version: CLAUDE_API_VERSION.to_string(),
            api_key: None,
        }
    }
}

/// Settings for the `relay_chat` terminal client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatClientConfig {
    pub url: String,
    pub provider: String,
    pub model: String,
    /// Application-level `{"type":"ping"}` interval
    pub keepalive_secs: u64,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            provider: PROVIDER_OPENAI.to_string(),
            model: OPENAI_DEFAULT_MODEL.to_string(),
            keepalive_secs: 25,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            connection: ConnectionSettings::default(),
            retry: RetrySettings::default(),
            limits: LimitsConfig::default(),
            providers: ProvidersConfig::default(),
            client: ChatClientConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl RelayConfig {
    /// Load configuration from a YAML file, then apply environment overrides
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config: RelayConfig = serde_yaml::from_str(&yaml_content)?;

        dotenv::dotenv().ok();
        config.apply_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read API keys and the `PORT` override from the environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.providers.openai.api_key = non_empty_env("OPENAI_API_KEY");
        self.providers.claude.api_key = non_empty_env("CLAUDEAI_API_KEY");

        if let Some(port) = non_empty_env("PORT") {
            info!("Overriding server port from environment variable");
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("PORT is not a valid port: {}", port)))?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.connection
            .to_connection_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.server.max_frame_size == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_frame_size must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms".to_string(),
            ));
        }

        if self.limits.max_files_per_request == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_files_per_request must be greater than 0".to_string(),
            ));
        }

        if self.limits.max_total_upload_size < self.limits.max_file_size {
            return Err(ConfigError::ValidationError(
                "limits.max_total_upload_size must not be below limits.max_file_size".to_string(),
            ));
        }

        if self.limits.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "limits.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.providers.breaker_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "providers.breaker_threshold must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  Bind address: {}", self.server.bind_address());
        info!("  Max frame size: {} bytes", self.server.max_frame_size);
        info!(
            "  Reconnect: {} attempts, backoff {}ms..{}ms",
            self.connection.max_reconnect_attempts,
            self.connection.initial_backoff_ms,
            self.connection.max_backoff_ms
        );
        info!(
            "  Health check: ping every {}s, pong timeout {}s",
            self.connection.ping_interval_secs, self.connection.pong_timeout_secs
        );
        info!(
            "  LLM retry: {} attempts, initial backoff {}ms",
            self.retry.max_attempts, self.retry.initial_backoff_ms
        );
        info!(
            "  Limits: {} files, {} bytes per file, {} bytes total",
            self.limits.max_files_per_request, self.limits.max_file_size, self.limits.max_total_upload_size
        );
        info!(
            "  Providers: OpenAI {}, Claude {}",
            if self.providers.openai.api_key.is_some() { "configured" } else { "missing key" },
            if self.providers.claude.api_key.is_some() { "configured" } else { "missing key" }
        );
        info!("  Log level: {}", self.log_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());

        let connection = config.connection.to_connection_config();
        assert_eq!(connection.ping_interval, Duration::from_secs(30));
        assert_eq!(connection.pong_timeout, Duration::from_secs(120));
        assert_eq!(config.retry.to_policy().max_attempts, 3);
        assert_eq!(config.limits.file_limits(), FileLimits::default());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
server:
  port: 9000
connection:
  max_reconnect_attempts: 3
  queued_message_ttl_secs: 600
log_level: debug
"#;
        let config: RelayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.connection.max_reconnect_attempts, 3);
        assert_eq!(config.connection.ping_interval_secs, 30);
        assert_eq!(
            config.connection.to_connection_config().queued_message_ttl,
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.providers.openai.model, "gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config: RelayConfig = serde_yaml::from_str("log_level: loud").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.log_level = "info".to_string();
        config.connection.ping_interval_secs = 200;
        assert!(config.validate().is_err(), "pong timeout below ping interval");

        config.connection.ping_interval_secs = 30;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "limits:\n  max_files_per_request: 10").unwrap();

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.limits.max_files_per_request, 10);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RelayConfig::load("/nonexistent/relay.yaml"),
            Err(ConfigError::FileError(_))
        ));
    }
}
