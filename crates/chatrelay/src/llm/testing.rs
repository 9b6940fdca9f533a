//! Scripted provider for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use super::error::LLMError;
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse, ChatStream, Choice, Message, StreamEvent, Usage};

enum Script {
    Tokens(Vec<String>),
    /// Tokens, then a mid-stream failure.
    Interrupted(Vec<String>, String),
    /// Fails before any response.
    Fails(String),
    /// Tokens, then never finishes.
    Stalls(Vec<String>),
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Replays a fixed script and records the requests it receives.
pub struct ScriptedProvider {
    script: Script,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
    released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    fn with(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tokens(tokens: &[&str]) -> Self {
        Self::with(Script::Tokens(tokens.iter().map(|t| t.to_string()).collect()))
    }

    pub fn interrupted(tokens: &[&str], message: &str) -> Self {
        Self::with(Script::Interrupted(
            tokens.iter().map(|t| t.to_string()).collect(),
            message.to_string(),
        ))
    }

    pub fn failing(message: &str) -> Self {
        Self::with(Script::Fails(message.to_string()))
    }

    pub fn stalling(tokens: &[&str]) -> Self {
        Self::with(Script::Stalls(tokens.iter().map(|t| t.to_string()).collect()))
    }

    /// Whether a stalled stream handed out by this provider has been dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn record(&self, request: ChatRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        self.record(request);
        match &self.script {
            Script::Tokens(tokens) => Ok(ChatResponse {
                id: "scripted".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(tokens.concat()),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: tokens.len() as u32,
                    total_tokens: 1 + tokens.len() as u32,
                }),
            }),
            Script::Interrupted(_, message) | Script::Fails(message) => {
                Err(LLMError::Stream(message.clone()))
            }
            Script::Stalls(_) => Err(LLMError::Stream("stalled".to_string())),
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        self.record(request);
        let events: Vec<Result<StreamEvent, LLMError>> = match &self.script {
            Script::Tokens(tokens) => tokens
                .iter()
                .map(|t| Ok(StreamEvent::Token(t.clone())))
                .chain(std::iter::once(Ok(StreamEvent::Done { usage: None })))
                .collect(),
            Script::Interrupted(tokens, message) => tokens
                .iter()
                .map(|t| Ok(StreamEvent::Token(t.clone())))
                .chain(std::iter::once(Err(LLMError::Stream(message.clone()))))
                .collect(),
            Script::Fails(message) => {
                return Err(LLMError::Api {
                    status: 503,
                    message: message.clone(),
                });
            }
            Script::Stalls(tokens) => {
                let guard = DropFlag(self.released.clone());
                let tokens: Vec<Result<StreamEvent, LLMError>> = tokens
                    .iter()
                    .map(|t| Ok(StreamEvent::Token(t.clone())))
                    .collect();
                let stream = futures::stream::iter(tokens)
                    .chain(futures::stream::pending())
                    .map(move |event| {
                        let _held = &guard;
                        event
                    });
                return Ok(Box::pin(stream));
            }
        };
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
