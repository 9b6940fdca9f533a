//! Read-only endpoints the UI uses to populate its menus and setup page.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::credentials::{ConfigStatus, check_config};
use crate::llm::ProviderModels;
use crate::server::AppState;

#[derive(Serialize)]
pub struct ModelsResponse {
    providers: Vec<ProviderModels>,
    default_provider: String,
    default_model: String,
}

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        providers: state.registry.catalog(),
        default_provider: state.chat.default_provider.clone(),
        default_model: state.chat.default_model.clone(),
    })
}

/// GET /api/config/status
///
/// Recomputed from the environment on every call.
pub async fn config_status(State(state): State<AppState>) -> Json<ConfigStatus> {
    Json(check_config(&*state.env))
}
