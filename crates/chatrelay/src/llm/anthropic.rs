//! Anthropic LLM provider with native API format.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use super::error::{LLMError, ensure_success};
use super::provider::{LLMProvider, Provider};
use super::sse::SseDataStream;
use super::types::{
    ChatRequest, ChatResponse, ChatStream, Choice, Message, Role, StreamEvent, Usage,
};

/// Anthropic provider with native API format.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_version: String,
}

impl AnthropicProvider {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
        }
    }

    fn build_request(&self, body: &Request) -> Result<reqwest::RequestBuilder, LLMError> {
        let Some(ref key) = self.api_key else {
            return Err(LLMError::MissingCredential {
                provider: Provider::Anthropic,
            });
        };
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        Ok(self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-api-key", key)
            .header("anthropic-version", &self.api_version)
            .json(body))
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let anthropic_request = to_request(&request, None);

        let response = self.build_request(&anthropic_request)?.send().await?;
        let response = ensure_success(response).await?;

        let anthropic_response: Response = response.json().await?;
        Ok(from_response(anthropic_response))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let anthropic_request = to_request(&request, Some(true));

        let response = self.build_request(&anthropic_request)?.send().await?;
        let response = ensure_success(response).await?;

        let sse_stream = SseDataStream::new(response.bytes_stream());
        Ok(Box::pin(StreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(serde::Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(serde::Deserialize)]
struct Response {
    id: String,
    content: Vec<ResponseContent>,
    stop_reason: Option<String>,
    usage: Option<ResponseUsage>,
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(serde::Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ============================================================================
// Conversions
// ============================================================================

fn to_request(request: &ChatRequest, stream: Option<bool>) -> Request {
    // Anthropic wants system as a separate field
    let messages = request
        .conversation()
        .map(|msg| RequestMessage {
            role: match msg.role {
                Role::Assistant => "assistant",
                _ => "user",
            },
            content: msg.content.clone(),
        })
        .collect();

    Request {
        model: request.model.clone(),
        max_tokens: request.max_tokens.unwrap_or(4096),
        system: request.system_prompt(),
        messages,
        temperature: request.temperature,
        stream,
    }
}

fn from_response(response: Response) -> ChatResponse {
    let content = response
        .content
        .into_iter()
        .filter_map(|c| match c {
            ResponseContent::Text { text } => Some(text),
            ResponseContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    ChatResponse {
        id: response.id,
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(content),
            finish_reason: response.stop_reason,
        }],
        usage: response.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens.saturating_add(u.output_tokens),
        }),
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: WireMessage,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error {
        error: WireError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(serde::Deserialize)]
struct WireMessage {
    usage: Option<WireUsage>,
}

#[derive(serde::Deserialize)]
struct Delta {
    text: Option<String>,
}

#[derive(serde::Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(serde::Deserialize)]
struct WireError {
    message: String,
}

/// Maps Anthropic message events to [`StreamEvent`]s.
///
/// The stream only completes at `message_stop`.
struct StreamAdapter<S> {
    inner: SseDataStream<S>,
    input_tokens: u32,
    output_tokens: u32,
    done: bool,
}

impl<S> StreamAdapter<S> {
    fn new(inner: SseDataStream<S>) -> Self {
        Self {
            inner,
            input_tokens: 0,
            output_tokens: 0,
            done: false,
        }
    }

    fn finish(&mut self) -> StreamEvent {
        self.done = true;
        let usage = (self.input_tokens > 0 || self.output_tokens > 0).then(|| Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens.saturating_add(self.output_tokens),
        });
        StreamEvent::Done { usage }
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
                    let event = match serde_json::from_str::<WireEvent>(&data) {
                        Ok(event) => event,
                        Err(e) => {
                            self.done = true;
                            return Poll::Ready(Some(Err(e.into())));
                        }
                    };
                    match event {
                        WireEvent::MessageStart { message } => {
                            let usage = message.usage.unwrap_or_default();
                            self.input_tokens = usage.input_tokens;
                            self.output_tokens = usage.output_tokens;
                        }
                        WireEvent::ContentBlockDelta { delta } => {
                            if let Some(text) = delta.text
                                && !text.is_empty()
                            {
                                return Poll::Ready(Some(Ok(StreamEvent::Token(text))));
                            }
                        }
                        WireEvent::MessageDelta { usage: Some(u) } => {
                            self.output_tokens = u.output_tokens;
                        }
                        WireEvent::MessageStop => {
                            let done = self.finish();
                            return Poll::Ready(Some(Ok(done)));
                        }
                        WireEvent::Error { error } => {
                            self.done = true;
                            return Poll::Ready(Some(Err(LLMError::Stream(error.message))));
                        }
                        WireEvent::MessageDelta { usage: None } | WireEvent::Unknown => {}
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Stream(
                        "stream ended before completion".to_string(),
                    ))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
