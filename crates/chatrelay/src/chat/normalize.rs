//! Conversion of UI messages into flat role/content messages.

use serde::Deserialize;
use serde_json::Value;

use crate::llm::{Message, Role};

/// Body of a chat request sent by the UI.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<IncomingMessage>,
}

/// One conversation turn as sent by the UI.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: Role,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

/// A typed fragment of a conversation turn.
///
/// Only text carries meaning here. Every other kind (files, reasoning, tool
/// invocations) lands in `Other`, as does any part that is malformed, so a
/// strange part never rejects the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub enum MessagePart {
    Text { text: Option<String> },
    Other,
}

impl From<Value> for MessagePart {
    fn from(value: Value) -> Self {
        if value.get("type").and_then(Value::as_str) != Some("text") {
            return MessagePart::Other;
        }
        MessagePart::Text {
            text: value.get("text").and_then(Value::as_str).map(str::to_string),
        }
    }
}

impl MessagePart {
    fn text(&self) -> &str {
        match self {
            MessagePart::Text { text } => text.as_deref().unwrap_or_default(),
            MessagePart::Other => "",
        }
    }
}

/// Flatten each message's text parts into a single content string.
///
/// Order and roles are preserved; non-text parts are dropped silently.
pub fn normalize(messages: &[IncomingMessage]) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| Message {
            role: msg.role,
            content: msg
                .parts
                .iter()
                .flatten()
                .map(MessagePart::text)
                .collect(),
        })
        .collect()
}
