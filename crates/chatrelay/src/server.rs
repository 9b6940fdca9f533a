use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::config::ChatConfig;
use crate::credentials::EnvSource;
use crate::handlers;
use crate::llm::ModelRegistry;

/// Model used when neither the config nor the registry names a default.
pub const FALLBACK_MODEL: &str = "gpt-4.1";

/// Resolved chat defaults.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_provider: String,
    pub default_model: String,
    pub system_prompt: String,
}

impl ChatSettings {
    pub fn resolve(config: &ChatConfig, registry: &ModelRegistry) -> Self {
        let default_model = config
            .default_model
            .clone()
            .or_else(|| {
                registry
                    .default_model(&config.default_provider)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| FALLBACK_MODEL.to_string());

        Self {
            default_provider: config.default_provider.clone(),
            default_model,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

/// Shared application state. Immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: ModelRegistry,
    pub chat: Arc<ChatSettings>,
    pub env: Arc<dyn EnvSource>,
}

impl AppState {
    pub fn new(registry: ModelRegistry, chat: &ChatConfig, env: Arc<dyn EnvSource>) -> Self {
        let chat = Arc::new(ChatSettings::resolve(chat, &registry));
        Self {
            registry,
            chat,
            env,
        }
    }
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api = Router::new()
        .route("/chat", post(handlers::chat))
        .route("/models", get(handlers::list_models))
        .route("/config/status", get(handlers::config_status))
        .with_state(state);

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .nest("/api", api)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}
