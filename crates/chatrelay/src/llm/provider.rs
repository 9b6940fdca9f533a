//! LLM provider trait and the closed set of supported vendors.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use super::error::LLMError;
use super::types::{ChatRequest, ChatResponse, ChatStream};

/// Trait for LLM providers with different API formats.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Make a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// Make a streaming chat completion request.
    ///
    /// Dropping the returned stream closes the upstream connection.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;
}

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Google,
}

impl Provider {
    /// All providers in declaration order.
    pub const ALL: [Provider; 3] = [Provider::OpenAI, Provider::Anthropic, Provider::Google];

    /// Parse a provider key. Unknown keys yield `None`.
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "openai" => Some(Provider::OpenAI),
            "anthropic" => Some(Provider::Anthropic),
            "google" => Some(Provider::Google),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GOOGLE_GENAI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
