//! Emotion Classification Providers
//!
//! The relay reaches two classifiers, one for voice recordings and one for
//! facial-expression snapshots. Both live behind the same HTTP service and are
//! called with a multipart upload of the raw media bytes.

use crate::{media::MediaPayload, message::EmotionLabel};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{info, warn};

/// Defines the contract for any service that can label the emotion in a piece of media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, media: MediaPayload) -> Result<EmotionLabel>;
}

/// Which of the ML service's analysis endpoints a classifier talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Voice,
    Face,
}

impl Modality {
    fn path(&self) -> &'static str {
        match self {
            Modality::Voice => "analyze/voice",
            Modality::Face => "analyze/face",
        }
    }

    fn field(&self) -> &'static str {
        match self {
            Modality::Voice => "audio",
            Modality::Face => "image",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            Modality::Voice => "audio.wav",
            Modality::Face => "image.jpg",
        }
    }

    fn default_mime(&self) -> &'static str {
        match self {
            Modality::Voice => "audio/wav",
            Modality::Face => "image/jpeg",
        }
    }
}

/// Body returned by the ML service. A failed analysis comes back as
/// `{"error": "..."}`, sometimes with a 200 status.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnalysisBody {
    Label(EmotionLabel),
    Failure { error: String },
}

/// An `EmotionClassifier` backed by the ML service's HTTP API.
#[derive(Clone)]
pub struct HttpEmotionClassifier {
    http: reqwest::Client,
    endpoint: String,
    modality: Modality,
}

impl HttpEmotionClassifier {
    /// Creates a classifier for one modality of the ML service at `base_url`.
    pub fn new(http: reqwest::Client, base_url: &str, modality: Modality) -> Self {
        let endpoint = format!("{}/{}", base_url.trim_end_matches('/'), modality.path());
        Self {
            http,
            endpoint,
            modality,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmotionClassifier for HttpEmotionClassifier {
    async fn classify(&self, media: MediaPayload) -> Result<EmotionLabel> {
        let modality = self.modality;
        let size = media.len();
        let part = Part::bytes(media.bytes.to_vec())
            .file_name(modality.file_name())
            .mime_str(media.mime_or(modality.default_mime()))
            .context("Invalid media type for upload")?;
        let form = Form::new().part(modality.field(), part);

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .inspect_err(|e| warn!(endpoint = %self.endpoint, error = %e, "Emotion service request failed"))
            .context("Emotion service unreachable")?;

        let status = response.status();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<AnalysisBody>(&body);

        match (status.is_success(), parsed) {
            (true, Ok(AnalysisBody::Label(label))) => {
                info!(?modality, size, emotion = %label.emotion, confidence = label.confidence, "Emotion analysis complete");
                Ok(label)
            }
            (_, Ok(AnalysisBody::Failure { error })) => {
                warn!(?modality, %status, %error, "Emotion analysis rejected the input");
                Err(anyhow!(error))
            }
            (false, _) => bail!("Emotion service returned {}", status),
            (true, Err(e)) => {
                Err(anyhow!(e).context("Emotion service returned a malformed response"))
            }
        }
    }
}
