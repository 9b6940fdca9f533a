//! Chat endpoint.
//!
//! Resolves the requested provider/model, flattens the UI messages and relays
//! the upstream completion as a UI message stream over SSE.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::chat::{ChatBody, normalize};
use crate::llm::{ChatStream, LLMError, StreamEvent, Usage};
use crate::response;
use crate::server::AppState;

/// Header selecting the provider.
pub const PROVIDER_HEADER: &str = "x-provider";
/// Header selecting the model.
pub const MODEL_HEADER: &str = "x-model";
/// Header announcing the UI message stream protocol version.
pub const UI_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";

// ============================================================================
// Errors
// ============================================================================

/// Failures of a chat request before the response stream starts.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The provider/model pair is not registered.
    #[error("Model not found: {provider}/{model}")]
    ModelNotFound { provider: String, model: String },

    /// The request body is not a valid chat body.
    #[error("{0}")]
    InvalidBody(#[from] serde_json::Error),

    /// The upstream call could not be started.
    #[error("{0}")]
    Upstream(#[from] LLMError),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::ModelNotFound { .. } => StatusCode::BAD_REQUEST,
            ChatError::InvalidBody(_) | ChatError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let mut message = self.to_string();
        if message.is_empty() {
            message = "Unknown error".to_string();
        }
        response::error(self.status(), message)
    }
}

// ============================================================================
// Handler
// ============================================================================

fn header_or<'a>(headers: &'a HeaderMap, name: &str, default: &'a str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

/// POST /api/chat
///
/// Headers: `x-provider`, `x-model` (both optional).
/// Body: `{"messages": [{"role": "...", "parts": [...]}, ...]}`
pub async fn chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let provider = header_or(&headers, PROVIDER_HEADER, &state.chat.default_provider).to_string();
    let model = header_or(&headers, MODEL_HEADER, &state.chat.default_model).to_string();

    match start_stream(&state, &provider, &model, &body).await {
        Ok(stream) => {
            debug!(provider = %provider, model = %model, "Streaming chat response");
            let stream = UiMessageStream::new(stream, provider, model);
            (
                [(UI_STREAM_HEADER, "v1")],
                Sse::new(stream).keep_alive(KeepAlive::default()),
            )
                .into_response()
        }
        Err(err) => {
            match err {
                ChatError::ModelNotFound { .. } => {
                    warn!(
                        provider = %provider,
                        model = %model,
                        "Requested model is not registered"
                    );
                }
                _ => {
                    error!(
                        provider = %provider,
                        model = %model,
                        error = %err,
                        "Chat request failed"
                    );
                }
            }
            err.into_response()
        }
    }
}

async fn start_stream(
    state: &AppState,
    provider: &str,
    model: &str,
    body: &[u8],
) -> Result<ChatStream, ChatError> {
    let body: ChatBody = serde_json::from_slice(body)?;

    let handle = state
        .registry
        .lookup(provider, model)
        .ok_or_else(|| ChatError::ModelNotFound {
            provider: provider.to_string(),
            model: model.to_string(),
        })?;

    let messages = normalize(&body.messages);
    Ok(handle
        .stream_generate(&state.chat.system_prompt, messages)
        .await?)
}

// ============================================================================
// UI Message Stream
// ============================================================================

/// One chunk of the UI message stream protocol.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum UiChunk {
    Start,
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    FinishStep,
    Finish,
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

fn chunk_event(chunk: &UiChunk) -> Event {
    Event::default()
        .json_data(chunk)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

/// Relays upstream tokens as UI message stream chunks.
///
/// Dropping this stream (client disconnect) drops the upstream stream with it.
struct UiMessageStream {
    inner: ChatStream,
    pending: VecDeque<Event>,
    text_id: String,
    provider: String,
    model: String,
    finished: bool,
}

impl UiMessageStream {
    fn new(inner: ChatStream, provider: String, model: String) -> Self {
        let text_id = format!("txt_{}", Ulid::new());
        let mut stream = Self {
            inner,
            pending: VecDeque::new(),
            text_id,
            provider,
            model,
            finished: false,
        };
        stream.push(UiChunk::Start);
        stream.push(UiChunk::StartStep);
        stream.push(UiChunk::TextStart {
            id: stream.text_id.clone(),
        });
        stream
    }

    fn push(&mut self, chunk: UiChunk) {
        self.pending.push_back(chunk_event(&chunk));
    }

    fn finish(&mut self, usage: Option<Usage>) {
        self.finished = true;
        debug!(
            provider = %self.provider,
            model = %self.model,
            usage = ?usage,
            "Chat stream complete"
        );
        self.push(UiChunk::TextEnd {
            id: self.text_id.clone(),
        });
        self.push(UiChunk::FinishStep);
        self.push(UiChunk::Finish);
        self.pending.push_back(Event::default().data("[DONE]"));
    }

    fn fail(&mut self, err: LLMError) {
        self.finished = true;
        warn!(
            provider = %self.provider,
            model = %self.model,
            error = %err,
            "Upstream stream failed"
        );
        self.push(UiChunk::Error {
            error_text: err.to_string(),
        });
        self.pending.push_back(Event::default().data("[DONE]"));
    }
}

impl Drop for UiMessageStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                provider = %self.provider,
                model = %self.model,
                "Client went away mid-stream; releasing upstream"
            );
        }
    }
}

impl Stream for UiMessageStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(StreamEvent::Token(delta)))) => {
                    let id = self.text_id.clone();
                    self.push(UiChunk::TextDelta { id, delta });
                }
                Poll::Ready(Some(Ok(StreamEvent::Done { usage }))) => self.finish(usage),
                Poll::Ready(Some(Err(e))) => self.fail(e),
                Poll::Ready(None) => self.finish(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::ChatConfig;
    use crate::llm::testing::ScriptedProvider;
    use crate::llm::{Message, ModelRegistry, Provider, Role};
    use crate::server::{AppState, build_app};

    fn app(provider: Arc<ScriptedProvider>) -> Router {
        let registry = ModelRegistry::builder()
            .model(Provider::OpenAI, "gpt-4.1", "gpt-4.1", provider.clone())
            .model(Provider::OpenAI, "gpt-4", "gpt-4", provider.clone())
            .model(
                Provider::Anthropic,
                "claude-3-opus",
                "claude-3-opus-20240229",
                provider,
            )
            .build();
        let env: HashMap<String, String> = HashMap::new();
        let state = AppState::new(registry, &ChatConfig::default(), Arc::new(env));
        build_app(state, 30)
    }

    fn chat_request(headers: &[(&str, &str)], body: impl Into<Body>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(body.into()).unwrap()
    }

    fn messages_body() -> String {
        serde_json::json!({
            "messages": [{
                "id": "m1",
                "role": "user",
                "parts": [
                    {"type": "text", "text": "a"},
                    {"type": "file", "url": "data:image/png;base64,AAAA", "mediaType": "image/png"},
                    {"type": "text", "text": "b"}
                ]
            }]
        })
        .to_string()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    /// Parsed `data:` payloads of an SSE body.
    fn data_lines(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_defaults_to_openai_gpt_4_1_and_streams() {
        let provider = Arc::new(ScriptedProvider::tokens(&["Hel", "lo"]));
        let response = app(provider.clone())
            .oneshot(chat_request(&[], messages_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[UI_STREAM_HEADER], "v1");
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let body = body_string(response).await;
        let lines = data_lines(&body);
        let types: Vec<String> = lines
            .iter()
            .filter(|l| l.as_str() != "[DONE]")
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(
            types,
            vec![
                "start",
                "start-step",
                "text-start",
                "text-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
        assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));

        let first_delta: serde_json::Value = serde_json::from_str(&lines[3]).unwrap();
        assert_eq!(first_delta["delta"], "Hel");
        let start: serde_json::Value = serde_json::from_str(&lines[2]).unwrap();
        assert_eq!(first_delta["id"], start["id"]);

        assert_eq!(provider.calls(), 1);
        let request = provider.last_request().unwrap();
        assert_eq!(request.model, "gpt-4.1");
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("system design coaching"));
        assert_eq!(request.messages[1], Message::user("ab"));
    }

    #[tokio::test]
    async fn test_headers_select_provider_and_model() {
        let provider = Arc::new(ScriptedProvider::tokens(&["ok"]));
        let response = app(provider.clone())
            .oneshot(chat_request(
                &[(PROVIDER_HEADER, "anthropic"), (MODEL_HEADER, "claude-3-opus")],
                messages_body(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let _ = body_string(response).await;
        assert_eq!(
            provider.last_request().unwrap().model,
            "claude-3-opus-20240229"
        );
    }

    #[tokio::test]
    async fn test_empty_headers_fall_back_to_defaults() {
        let provider = Arc::new(ScriptedProvider::tokens(&["ok"]));
        let response = app(provider.clone())
            .oneshot(chat_request(
                &[(PROVIDER_HEADER, ""), (MODEL_HEADER, "")],
                messages_body(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let _ = body_string(response).await;
        assert_eq!(provider.last_request().unwrap().model, "gpt-4.1");
    }

    #[tokio::test]
    async fn test_unknown_model_is_400_without_upstream_call() {
        let provider = Arc::new(ScriptedProvider::tokens(&["never"]));
        let response = app(provider.clone())
            .oneshot(chat_request(
                &[(PROVIDER_HEADER, "openai"), (MODEL_HEADER, "nonexistent-model")],
                messages_body(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Model not found: openai/nonexistent-model"})
        );
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_400() {
        let provider = Arc::new(ScriptedProvider::tokens(&["never"]));
        let response = app(provider.clone())
            .oneshot(chat_request(&[(PROVIDER_HEADER, "mistral")], messages_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "Model not found: mistral/gpt-4.1"
        );
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_500_with_message() {
        let provider = Arc::new(ScriptedProvider::tokens(&["never"]));
        let response = app(provider.clone())
            .oneshot(chat_request(&[], "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let error = body_json(response).await["error"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(!error.is_empty());
        assert_ne!(error, "Unknown error");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_messages_is_500() {
        let provider = Arc::new(ScriptedProvider::tokens(&["never"]));
        let response = app(provider)
            .oneshot(chat_request(&[], "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let error = body_json(response).await["error"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(error.contains("messages"));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_500_with_message() {
        let provider = Arc::new(ScriptedProvider::failing("upstream down"));
        let response = app(provider.clone())
            .oneshot(chat_request(&[], messages_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "api error (status 503): upstream down"})
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_emits_error_chunk() {
        let provider = Arc::new(ScriptedProvider::interrupted(&["par"], "boom"));
        let response = app(provider)
            .oneshot(chat_request(&[], messages_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        let lines = data_lines(&body);

        let error: serde_json::Value = serde_json::from_str(&lines[lines.len() - 2]).unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["errorText"], "stream error: boom");
        assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));
        assert!(!body.contains("\"type\":\"finish\""));
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_upstream_stream() {
        let provider = Arc::new(ScriptedProvider::stalling(&["par"]));
        let response = app(provider.clone())
            .oneshot(chat_request(&[], messages_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let data = frame.into_data().unwrap();
        assert!(String::from_utf8_lossy(&data).contains("\"type\":\"start\""));
        assert!(!provider.released());

        drop(body);
        assert!(provider.released());
    }

    #[tokio::test]
    async fn test_malformed_parts_do_not_fail_the_request() {
        let provider = Arc::new(ScriptedProvider::tokens(&["ok"]));
        let body = serde_json::json!({
            "messages": [{
                "role": "user",
                "parts": [{"text": "x"}, {"type": "text", "text": "hi"}]
            }]
        });
        let response = app(provider.clone())
            .oneshot(chat_request(&[], body.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let _ = body_string(response).await;
        assert_eq!(
            provider.last_request().unwrap().messages[1],
            Message::user("hi")
        );
    }

    #[test]
    fn test_error_status_mapping() {
        let not_found = ChatError::ModelNotFound {
            provider: "openai".to_string(),
            model: "x".to_string(),
        };
        assert_eq!(not_found.status(), StatusCode::BAD_REQUEST);

        let upstream = ChatError::Upstream(LLMError::RateLimit { retry_after: None });
        assert_eq!(upstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
