//! LLM provider clients for chat completions.

mod anthropic;
mod error;
mod google;
mod openai;
mod provider;
mod registry;
mod sse;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use anthropic::AnthropicProvider;
pub use error::LLMError;
pub use google::GoogleProvider;
pub use openai::OpenAICompatibleProvider;
pub use provider::{LLMProvider, Provider};
pub use registry::{CATALOG, ModelHandle, ModelRegistry, ModelRegistryBuilder, ProviderModels};
pub use types::{ChatRequest, ChatResponse, ChatStream, Choice, Message, Role, StreamEvent, Usage};
