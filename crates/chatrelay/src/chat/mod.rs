//! Chat message handling shared by the HTTP handler and the CLI.

pub mod client;
mod normalize;

pub use client::{CallError, CallErrorKind, LlmResponse, call_llm};
pub use normalize::{ChatBody, IncomingMessage, MessagePart, normalize};
