//! OpenAI chat completions provider.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use super::error::{LLMError, ensure_success};
use super::provider::{LLMProvider, Provider};
use super::sse::SseDataStream;
use super::types::{ChatRequest, ChatResponse, ChatStream, Message, StreamEvent, Usage};

/// OpenAI-compatible provider.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn build_request<T: serde::Serialize>(
        &self,
        body: &T,
    ) -> Result<reqwest::RequestBuilder, LLMError> {
        let Some(ref key) = self.api_key else {
            return Err(LLMError::MissingCredential {
                provider: Provider::OpenAI,
            });
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        Ok(self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", key))
            .json(body))
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let response = self.build_request(&request)?.send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let stream_request = StreamRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = self.build_request(&stream_request)?.send().await?;
        let response = ensure_success(response).await?;

        let sse_stream = SseDataStream::new(response.bytes_stream());
        Ok(Box::pin(StreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(serde::Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(serde::Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(serde::Deserialize)]
struct WireError {
    message: String,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Maps chat completion chunks to [`StreamEvent`]s.
///
/// The stream only completes at `[DONE]`; an error payload, an undecodable
/// chunk or a body that ends early is an error.
struct StreamAdapter<S> {
    inner: SseDataStream<S>,
    usage: Option<Usage>,
    done: bool,
}

impl<S> StreamAdapter<S> {
    fn new(inner: SseDataStream<S>) -> Self {
        Self {
            inner,
            usage: None,
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
                    if data == "[DONE]" {
                        self.done = true;
                        let usage = self.usage.take();
                        return Poll::Ready(Some(Ok(StreamEvent::Done { usage })));
                    }

                    let chunk = match serde_json::from_str::<StreamChunk>(&data) {
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
                    if chunk.usage.is_some() {
                        self.usage = chunk.usage;
                    }
                    if let Some(choice) = chunk.choices.into_iter().next()
                        && let Some(content) = choice.delta.content
                        && !content.is_empty()
                    {
                        return Poll::Ready(Some(Ok(StreamEvent::Token(content))));
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
