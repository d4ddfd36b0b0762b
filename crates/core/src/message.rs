//! Domain types for one request/response cycle of the relay.

use crate::{
    error::RelayError,
    media::{MediaError, MediaPayload},
};
use serde_json::{Map, Value};
use std::fmt;

/// The discriminator selecting which provider path handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Voice,
    Face,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Voice => "voice",
            MessageKind::Face => "face",
        }
    }

    /// The payload field carried by messages of this kind.
    pub fn payload_field(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Voice => "audio",
            MessageKind::Face => "image",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageKind::Text),
            "voice" => Some(MessageKind::Voice),
            "face" => Some(MessageKind::Face),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PAYLOAD_FIELDS: [&str; 3] = ["text", "audio", "image"];

/// A validated user message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Text(String),
    Voice(MediaPayload),
    Face(MediaPayload),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Text(_) => MessageKind::Text,
            InboundMessage::Voice(_) => MessageKind::Voice,
            InboundMessage::Face(_) => MessageKind::Face,
        }
    }

    /// Classifies and validates the `data` of a `message` event.
    ///
    /// A missing or unknown `type` is `invalid_type`. A missing, empty or
    /// undecodable payload, or a payload field belonging to another kind, is
    /// `invalid_input`.
    pub fn from_value(value: &Value) -> Result<Self, RelayError> {
        let fields = value.as_object().ok_or(RelayError::InvalidType)?;
        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageKind::parse)
            .ok_or(RelayError::InvalidType)?;

        reject_foreign_fields(kind, fields)?;

        match kind {
            MessageKind::Text => match fields.get("text").and_then(Value::as_str) {
                Some(text) if !text.is_empty() => Ok(InboundMessage::Text(text.to_string())),
                _ => Err(RelayError::InvalidInput("Invalid text input".to_string())),
            },
            MessageKind::Voice => decode_media(fields, kind, "Invalid audio input")
                .map(InboundMessage::Voice),
            MessageKind::Face => decode_media(fields, kind, "Invalid image input")
                .map(InboundMessage::Face),
        }
    }

    /// The `data` object of a `message` event carrying this message.
    pub fn to_value(&self) -> Value {
        let payload = match self {
            InboundMessage::Text(text) => Value::String(text.clone()),
            InboundMessage::Voice(media) | InboundMessage::Face(media) => {
                Value::String(media.to_data_url())
            }
        };
        let kind = self.kind();
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        fields.insert(kind.payload_field().to_string(), payload);
        Value::Object(fields)
    }
}

fn reject_foreign_fields(kind: MessageKind, fields: &Map<String, Value>) -> Result<(), RelayError> {
    let own = kind.payload_field();
    for field in PAYLOAD_FIELDS.iter().filter(|f| **f != own) {
        if fields.get(*field).is_some_and(|v| !v.is_null()) {
            return Err(RelayError::InvalidInput(format!(
                "Unexpected field '{}' for '{}' message",
                field, kind
            )));
        }
    }
    Ok(())
}

fn decode_media(
    fields: &Map<String, Value>,
    kind: MessageKind,
    invalid: &str,
) -> Result<MediaPayload, RelayError> {
    let encoded = fields
        .get(kind.payload_field())
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::InvalidInput(invalid.to_string()))?;
    MediaPayload::decode(encoded).map_err(|e: MediaError| {
        tracing::debug!(%kind, error = %e, "Rejected media payload");
        RelayError::InvalidInput(invalid.to_string())
    })
}

/// The single outcome emitted for an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundResult {
    Response { content: String },
    Error { message: String },
}

impl OutboundResult {
    pub fn is_response(&self) -> bool {
        matches!(self, OutboundResult::Response { .. })
    }
}

impl From<Result<String, RelayError>> for OutboundResult {
    fn from(result: Result<String, RelayError>) -> Self {
        match result {
            Ok(content) => OutboundResult::Response { content },
            Err(e) => OutboundResult::Error {
                message: e.client_message(),
            },
        }
    }
}

/// A voice or face classification result.
///
/// Only `emotion` is required. A missing or non-numeric `confidence` is read
/// as `None` rather than failing the whole label.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EmotionLabel {
    pub emotion: String,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: Option<f64>,
}

fn lenient_confidence<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <Value as serde::Deserialize>::deserialize(deserializer)?;
    Ok(value.as_f64())
}
