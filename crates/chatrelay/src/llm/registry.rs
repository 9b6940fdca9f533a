//! Provider/model registry.
//!
//! Maps each provider to an ordered list of model ids, and each model id to a
//! [`ModelHandle`]. Built once at startup and never mutated; clones share the
//! same handles.

use std::fmt;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use super::anthropic::AnthropicProvider;
use super::error::LLMError;
use super::google::GoogleProvider;
use super::openai::OpenAICompatibleProvider;
use super::provider::{LLMProvider, Provider};
use super::types::{ChatRequest, ChatResponse, ChatStream, Message};
use crate::config::ProvidersConfig;
use crate::credentials::Credentials;

/// Compiled-in model catalog: `(provider, [(model id, upstream version)])`.
///
/// The first provider and the first model of each provider are the defaults.
pub const CATALOG: &[(Provider, &[(&str, &str)])] = &[
    (
        Provider::OpenAI,
        &[
            ("gpt-4.1", "gpt-4.1"),
            ("gpt-4", "gpt-4"),
            ("gpt-3.5-turbo", "gpt-3.5-turbo"),
        ],
    ),
    (
        Provider::Anthropic,
        &[
            ("claude-3-opus", "claude-3-opus-20240229"),
            ("claude-3-sonnet", "claude-3-sonnet-20240229"),
        ],
    ),
    (
        Provider::Google,
        &[
            ("gemini-pro", "gemini-pro"),
            ("gemini-1.5-pro", "gemini-1.5-pro"),
        ],
    ),
];

// ============================================================================
// ModelHandle
// ============================================================================

/// A callable model endpoint bound to one provider and model.
pub struct ModelHandle {
    provider: Provider,
    model: String,
    version: String,
    client: Arc<dyn LLMProvider>,
}

impl ModelHandle {
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        version: impl Into<String>,
        client: Arc<dyn LLMProvider>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            version: version.into(),
            client,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Public model id, as used in requests and the catalog.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model version string sent upstream.
    pub fn version(&self) -> &str {
        &self.version
    }

    fn request(&self, system: Option<&str>, messages: Vec<Message>) -> ChatRequest {
        let mut all = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            all.push(Message::system(system));
        }
        all.extend(messages);

        ChatRequest {
            model: self.version.clone(),
            messages: all,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Start a streaming generation.
    pub async fn stream_generate(
        &self,
        system: &str,
        messages: Vec<Message>,
    ) -> Result<ChatStream, LLMError> {
        self.client
            .chat_stream(self.request(Some(system), messages))
            .await
    }

    /// Run a single non-streaming generation.
    pub async fn generate(
        &self,
        system: Option<&str>,
        messages: Vec<Message>,
    ) -> Result<ChatResponse, LLMError> {
        self.client.chat(self.request(system, messages)).await
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ModelRegistry
// ============================================================================

/// Models offered by one provider, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderModels {
    pub provider: Provider,
    pub models: Vec<String>,
}

struct ProviderEntry {
    provider: Provider,
    models: Vec<Arc<ModelHandle>>,
}

/// Registry of model handles, keyed by provider then model id.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    entries: Arc<Vec<ProviderEntry>>,
}

impl ModelRegistry {
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// Build the compiled-in catalog.
    ///
    /// Each provider client captures its credential now; a provider without
    /// one is still registered and fails at call time.
    pub fn from_credentials(credentials: &Credentials, config: &ProvidersConfig) -> Self {
        let client = Client::new();
        let mut builder = Self::builder();

        for (provider, models) in CATALOG {
            let api_key = credentials.get(*provider).map(str::to_string);
            if api_key.is_none() {
                warn!(
                    provider = %provider,
                    env = provider.api_key_env(),
                    "Provider credential not set; requests to this provider will fail"
                );
            }

            let implementation: Arc<dyn LLMProvider> = match provider {
                Provider::OpenAI => Arc::new(OpenAICompatibleProvider::new(
                    client.clone(),
                    config.openai_base_url.clone(),
                    api_key,
                )),
                Provider::Anthropic => Arc::new(AnthropicProvider::new(
                    client.clone(),
                    config.anthropic_base_url.clone(),
                    api_key,
                )),
                Provider::Google => Arc::new(GoogleProvider::new(
                    client.clone(),
                    config.google_base_url.clone(),
                    api_key,
                )),
            };

            for (model, version) in *models {
                builder = builder.model(*provider, *model, *version, implementation.clone());
            }
            info!(provider = %provider, models = models.len(), "Registered provider");
        }

        builder.build()
    }

    /// Resolve a provider/model pair. Unknown pairs yield `None`.
    pub fn lookup(&self, provider: &str, model: &str) -> Option<Arc<ModelHandle>> {
        let provider = Provider::parse(provider)?;
        self.entries
            .iter()
            .find(|e| e.provider == provider)?
            .models
            .iter()
            .find(|h| h.model() == model)
            .cloned()
    }

    /// Every provider with its model ids, in registration order.
    pub fn catalog(&self) -> Vec<ProviderModels> {
        self.entries
            .iter()
            .map(|e| ProviderModels {
                provider: e.provider,
                models: e.models.iter().map(|h| h.model().to_string()).collect(),
            })
            .collect()
    }

    /// First model registered for `provider`.
    pub fn default_model(&self, provider: &str) -> Option<&str> {
        let provider = Provider::parse(provider)?;
        self.entries
            .iter()
            .find(|e| e.provider == provider)?
            .models
            .first()
            .map(|h| h.model())
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.catalog()).finish()
    }
}

/// Collects handles before freezing them into a [`ModelRegistry`].
#[derive(Default)]
pub struct ModelRegistryBuilder {
    entries: Vec<ProviderEntry>,
}

impl ModelRegistryBuilder {
    /// Register a model. Providers and models keep insertion order; a repeated
    /// model id replaces the earlier handle in place.
    pub fn model(
        mut self,
        provider: Provider,
        model: impl Into<String>,
        version: impl Into<String>,
        client: Arc<dyn LLMProvider>,
    ) -> Self {
        let handle = Arc::new(ModelHandle::new(provider, model, version, client));

        let index = match self.entries.iter().position(|e| e.provider == provider) {
            Some(index) => index,
            None => {
                self.entries.push(ProviderEntry {
                    provider,
                    models: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        let models = &mut self.entries[index].models;
        match models.iter().position(|h| h.model() == handle.model()) {
            Some(existing) => models[existing] = handle,
            None => models.push(handle),
        }
        self
    }

    pub fn build(self) -> ModelRegistry {
        ModelRegistry {
            entries: Arc::new(self.entries),
        }
    }
}
