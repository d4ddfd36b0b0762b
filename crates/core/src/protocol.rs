//! Defines the WebSocket message protocol between the browser client and the relay.
//!
//! Every frame is a JSON text frame naming an event and carrying its payload:
//! `{"event": "<name>", "data": <payload>}`.

use crate::message::{InboundMessage, OutboundResult};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

/// Events sent from the client (browser) to the server.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A user message. The payload stays untyped here so the dispatcher can
    /// tell an unknown kind apart from a malformed payload.
    Message(Value),
}

/// A missing `data` reads as `null`, so a bare `message` event still reaches
/// the dispatcher and gets an `error` back.
impl<'de> Deserialize<'de> for ClientEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Envelope {
            event: String,
            #[serde(default)]
            data: Value,
        }

        let envelope = Envelope::deserialize(deserializer)?;
        match envelope.event.as_str() {
            "message" => Ok(ClientEvent::Message(envelope.data)),
            other => Err(de::Error::unknown_variant(other, &["message"])),
        }
    }
}

impl From<&InboundMessage> for ClientEvent {
    fn from(msg: &InboundMessage) -> Self {
        ClientEvent::Message(msg.to_value())
    }
}

/// The only content type the relay replies with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResponsePayload {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

/// Events sent from the server to the client (browser).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A reply to a `message` event.
    Response(ResponsePayload),
    /// A failure while handling a `message` event.
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn response(content: impl Into<String>) -> Self {
        ServerEvent::Response(ResponsePayload {
            content_type: ContentType::Text,
            content: content.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Response(_) => "response",
            ServerEvent::Error(_) => "error",
        }
    }
}

impl From<OutboundResult> for ServerEvent {
    fn from(result: OutboundResult) -> Self {
        match result {
            OutboundResult::Response { content } => ServerEvent::response(content),
            OutboundResult::Error { message } => ServerEvent::error(message),
        }
    }
}
