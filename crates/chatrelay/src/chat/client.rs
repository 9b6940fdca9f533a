//! Single-shot (non-streaming) LLM calls.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::llm::{LLMError, Message, ModelRegistry, Usage};

/// A completed single-shot call.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A failed single-shot call, tagged with the provider it targeted.
#[derive(Debug, Error)]
#[error("Failed to call {provider}/{model}")]
pub struct CallError {
    pub provider: String,
    pub model: String,
    #[source]
    pub kind: CallErrorKind,
}

#[derive(Debug, Error)]
pub enum CallErrorKind {
    #[error("Message must be a non-empty string")]
    EmptyMessage,

    #[error("Message cannot be empty or whitespace only")]
    BlankMessage,

    #[error("Model not found: {provider}/{model}")]
    ModelNotFound { provider: String, model: String },

    #[error(transparent)]
    Llm(#[from] LLMError),
}

fn validate_input(message: &str) -> Result<(), CallErrorKind> {
    if message.is_empty() {
        return Err(CallErrorKind::EmptyMessage);
    }
    if message.trim().is_empty() {
        return Err(CallErrorKind::BlankMessage);
    }
    Ok(())
}

/// Send one user message and wait for the full reply.
pub async fn call_llm(
    registry: &ModelRegistry,
    provider: &str,
    model: &str,
    message: &str,
    system_prompt: Option<&str>,
) -> Result<LlmResponse, CallError> {
    let wrap = |kind: CallErrorKind| CallError {
        provider: provider.to_string(),
        model: model.to_string(),
        kind,
    };

    validate_input(message).map_err(wrap)?;

    let handle = registry.lookup(provider, model).ok_or_else(|| {
        wrap(CallErrorKind::ModelNotFound {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    })?;

    debug!(provider, model, version = handle.version(), "Calling model");
    let response = handle
        .generate(system_prompt, vec![Message::user(message)])
        .await
        .map_err(|e| wrap(e.into()))?;

    Ok(LlmResponse {
        content: response.content(),
        provider: provider.to_string(),
        model: model.to_string(),
        usage: response.usage,
    })
}
