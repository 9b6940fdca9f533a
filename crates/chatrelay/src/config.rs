use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::credentials::EnvSource;
use crate::llm::{AnthropicProvider, GoogleProvider, OpenAICompatibleProvider};

/// Environment variable overriding `chat.default_provider`.
pub const DEFAULT_PROVIDER_ENV: &str = "CHATRELAY_DEFAULT_PROVIDER";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Apply overrides taken from the environment.
    pub fn apply_env(&mut self, env: &(impl EnvSource + ?Sized)) {
        if let Some(provider) = env.var(DEFAULT_PROVIDER_ENV).filter(|v| !v.is_empty()) {
            self.chat.default_provider = provider;
        }
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

// ============================================================================
// ChatConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    /// Provider used when a request carries no `x-provider` header.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model used when a request carries no `x-model` header. When unset, the
    /// first catalog model of the default provider.
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: None,
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant specialized in system design coaching.".to_string()
}

// ============================================================================
// ProvidersConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_google_base_url")]
    pub google_base_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_base_url: default_openai_base_url(),
            anthropic_base_url: default_anthropic_base_url(),
            google_base_url: default_google_base_url(),
        }
    }
}

fn default_openai_base_url() -> String {
    OpenAICompatibleProvider::DEFAULT_BASE_URL.to_string()
}

fn default_anthropic_base_url() -> String {
    AnthropicProvider::DEFAULT_BASE_URL.to_string()
}

fn default_google_base_url() -> String {
    GoogleProvider::DEFAULT_BASE_URL.to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
