//! Google Gemini provider (Generative Language API).

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{LLMError, ensure_success};
use super::provider::{LLMProvider, Provider};
use super::sse::SseDataStream;
use super::types::{
    ChatRequest, ChatResponse, ChatStream, Choice, Message, Role, StreamEvent, Usage,
};

/// Gemini provider speaking the `generateContent` family of endpoints.
pub struct GoogleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn build_request(
        &self,
        model: &str,
        method: &str,
        body: &Request,
    ) -> Result<reqwest::RequestBuilder, LLMError> {
        let Some(ref key) = self.api_key else {
            return Err(LLMError::MissingCredential {
                provider: Provider::Google,
            });
        };
        let url = format!(
            "{}/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            model,
            method
        );

        Ok(self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", key)
            .json(body))
    }
}

#[async_trait]
impl LLMProvider for GoogleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let body = to_request(&request);

        let response = self
            .build_request(&request.model, "generateContent", &body)?
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let chunk: ResponseChunk = response.json().await?;
        Ok(from_response(chunk))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let body = to_request(&request);

        let response = self
            .build_request(&request.model, "streamGenerateContent?alt=sse", &body)?
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let sse_stream = SseDataStream::new(response.bytes_stream());
        Ok(Box::pin(StreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl From<UsageMetadata> for Usage {
    fn from(u: UsageMetadata) -> Self {
        Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

impl ResponseChunk {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: Some(text.to_string()),
        }],
    }
}

fn to_request(request: &ChatRequest) -> Request {
    let contents = request
        .conversation()
        .map(|msg| {
            let role = match msg.role {
                Role::Assistant => "model",
                _ => "user",
            };
            text_content(Some(role), &msg.content)
        })
        .collect();

    let generation_config = (request.temperature.is_some() || request.max_tokens.is_some())
        .then(|| GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
        });

    Request {
        contents,
        system_instruction: request
            .system_prompt()
            .map(|prompt| text_content(None, &prompt)),
        generation_config,
    }
}

fn from_response(chunk: ResponseChunk) -> ChatResponse {
    let content = chunk.text();
    let finish_reason = chunk
        .candidates
        .first()
        .and_then(|c| c.finish_reason.clone());

    ChatResponse {
        // generateContent responses carry no id
        id: String::new(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(content),
            finish_reason,
        }],
        usage: chunk.usage_metadata.map(Usage::from),
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Maps `streamGenerateContent` chunks to [`StreamEvent`]s.
///
/// Gemini has no terminal event. The last chunk carries a `finishReason`, and
/// a body that ends before one arrived is an error.
struct StreamAdapter<S> {
    inner: SseDataStream<S>,
    usage: Option<Usage>,
    finished: bool,
    done: bool,
}

impl<S> StreamAdapter<S> {
    fn new(inner: SseDataStream<S>) -> Self {
        Self {
            inner,
            usage: None,
            finished: false,
            done: false,
        }
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => {
                    let chunk = match serde_json::from_str::<ResponseChunk>(&data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            self.done = true;
                            return Poll::Ready(Some(Err(e.into())));
                        }
                    };
                    if let Some(error) = chunk.error {
                        self.done = true;
                        return Poll::Ready(Some(Err(LLMError::Stream(error.message))));
                    }
                    if chunk.candidates.iter().any(|c| c.finish_reason.is_some()) {
                        self.finished = true;
                    }
                    let text = chunk.text();
                    if let Some(usage) = chunk.usage_metadata {
                        self.usage = Some(usage.into());
                    }
                    if !text.is_empty() {
                        return Poll::Ready(Some(Ok(StreamEvent::Token(text))));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if !self.finished {
                        return Poll::Ready(Some(Err(LLMError::Stream(
                            "stream ended before completion".to_string(),
                        ))));
                    }
                    let usage = self.usage.take();
                    return Poll::Ready(Some(Ok(StreamEvent::Done { usage })));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
