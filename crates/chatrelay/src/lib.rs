//! Chatrelay - a minimal chat relay that streams replies from hosted LLM providers.

pub mod chat;
pub mod config;
pub mod credentials;
pub mod handlers;
pub mod llm;
pub mod response;
pub mod server;
