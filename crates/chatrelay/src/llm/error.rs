//! LLM error types.

use thiserror::Error;

use super::provider::Provider;

/// Check an HTTP response for rate-limit errors, returning `RateLimit` for 429.
pub fn check_response_error(response: &reqwest::Response) -> Option<LLMError> {
    if response.status().is_success() {
        return None;
    }
    if response.status().as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Some(LLMError::RateLimit { retry_after });
    }
    None
}

/// Turn a non-success upstream response into an error.
///
/// Returns `Ok(response)` untouched when the status is 2xx.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    if let Some(err) = check_response_error(&response) {
        return Err(err);
    }
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(LLMError::Api { status, message });
    }
    Ok(response)
}

/// Errors that can occur when making LLM API calls.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// The provider's credential was not present when the handle was built.
    #[error("{provider} API key is missing; set the {} environment variable", .provider.api_key_env())]
    MissingCredential { provider: Provider },

    /// The provider reported an error in the middle of a stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// The provider answered with a body that could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}
