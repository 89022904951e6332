//! Configuration for the chat relay.

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Ollama backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Hard upper bound for a single inference call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Prepended to every conversation as a system message when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            system_prompt: None,
        }
    }
}

/// Dispatch queue sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Number of workers, i.e. the cap on simultaneous backend calls.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Requests allowed to wait behind the busy workers.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Maximum trimmed content length, in characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Comma-separated list of allowed origins, or `*`.
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl CorsConfig {
    /// Parsed origin list; `None` means any origin.
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .origins
            .split(',')
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            None
        } else {
            Some(origins)
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama2".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_workers() -> usize {
    1
}
fn default_queue_depth() -> usize {
    16
}
fn default_max_content_chars() -> usize {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cors_origins() -> String {
    "*".to_string()
}

impl Config {
    /// Load configuration from `config.toml` (if present) and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (RELAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("config"))
    }

    /// Same as [`Config::load`] with an explicit config file path (extension optional).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = ConfigLoader::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid("dispatch.workers must be at least 1"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::Invalid("backend.timeout_secs must be at least 1"));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.model must not be empty"));
        }
        if self.validation.max_content_chars == 0 {
            return Err(ConfigError::Invalid(
                "validation.max_content_chars must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
