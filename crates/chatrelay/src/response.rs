//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Body of every error response: `{"error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
    let error = message.into();
    (status, Json(ErrorBody { error })).into_response()
}
