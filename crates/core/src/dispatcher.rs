//! The Message Dispatcher
//!
//! Turns one inbound `message` payload into exactly one [`OutboundResult`].
//! Text is forwarded to the completion provider as-is; voice and face media
//! are first labelled by their emotion classifier and the label is phrased
//! into a user turn for the same completion path.

use crate::{
    emotion::EmotionClassifier,
    error::RelayError,
    llm_client::{CompletionClient, THERAPIST_SYSTEM_PROMPT},
    media::MediaPayload,
    message::{InboundMessage, MessageKind, OutboundResult},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Builds the user turn sent to the completion provider after a classification.
pub fn emotion_user_turn(kind: MessageKind, emotion: &str) -> String {
    let source = match kind {
        MessageKind::Face => "my facial expression",
        MessageKind::Voice | MessageKind::Text => "my voice tone",
    };
    format!(
        "I'm feeling {} based on {}. Can you help me understand and process these emotions?",
        emotion, source
    )
}

/// Routes inbound messages to the injected providers.
///
/// The dispatcher holds no per-message state; one instance is shared by all
/// sessions.
#[derive(Clone)]
pub struct Dispatcher {
    completion: Arc<dyn CompletionClient>,
    voice: Arc<dyn EmotionClassifier>,
    face: Arc<dyn EmotionClassifier>,
    system_prompt: Arc<str>,
}

impl Dispatcher {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        voice: Arc<dyn EmotionClassifier>,
        face: Arc<dyn EmotionClassifier>,
    ) -> Self {
        Self {
            completion,
            voice,
            face,
            system_prompt: Arc::from(THERAPIST_SYSTEM_PROMPT),
        }
    }

    /// Replaces the persona sent as the system instruction.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<Arc<str>>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Handles the raw `data` of a `message` event.
    pub async fn handle(&self, raw: &Value) -> OutboundResult {
        let result = match InboundMessage::from_value(raw) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(kind = %e.kind(), error = %e, "Message handling failed");
        }
        result.into()
    }

    /// Handles an already validated message.
    #[instrument(name = "dispatch", skip_all, fields(kind = %message.kind()))]
    pub async fn dispatch(&self, message: InboundMessage) -> Result<String, RelayError> {
        match message {
            InboundMessage::Text(text) => {
                info!(chars = text.chars().count(), "Processing text input");
                self.complete(&text).await
            }
            InboundMessage::Voice(media) => {
                self.complete_from_emotion(MessageKind::Voice, self.voice.as_ref(), media)
                    .await
            }
            InboundMessage::Face(media) => {
                self.complete_from_emotion(MessageKind::Face, self.face.as_ref(), media)
                    .await
            }
        }
    }

    async fn complete_from_emotion(
        &self,
        kind: MessageKind,
        classifier: &dyn EmotionClassifier,
        media: MediaPayload,
    ) -> Result<String, RelayError> {
        info!(bytes = media.len(), "Processing {} input", kind);
        let label = classifier
            .classify(media)
            .await
            .map_err(|e| RelayError::provider(&e))?;
        // Confidence does not influence the prompt.
        info!(emotion = %label.emotion, confidence = label.confidence, "Emotion classified");
        self.complete(&emotion_user_turn(kind, &label.emotion)).await
    }

    async fn complete(&self, user_turn: &str) -> Result<String, RelayError> {
        let reply = self
            .completion
            .complete(&self.system_prompt, user_turn)
            .await
            .map_err(|e| RelayError::provider(&e))?;
        match reply {
            Some(content) if !content.is_empty() => {
                info!(chars = content.chars().count(), "Generated response");
                Ok(content)
            }
            _ => Err(RelayError::NoContent),
        }
    }
}
