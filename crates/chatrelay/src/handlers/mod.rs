//! HTTP request handlers.

mod chat;
mod health;
mod setup;

pub use chat::{ChatError, MODEL_HEADER, PROVIDER_HEADER, UI_STREAM_HEADER, chat};
pub use health::{livez, readyz};
pub use setup::{config_status, list_models};
