//! Decoding of the binary payloads carried by `voice` and `face` messages.
//!
//! Both kinds travel as base64 text, either bare or wrapped in a data URL
//! (`data:<mime>;base64,<data>`), and are decoded to raw bytes here before
//! being uploaded to a classifier.

use base64::Engine;
use bytes::Bytes;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MediaError {
    #[error("payload is empty")]
    Empty,
    #[error("data URL is not base64 encoded")]
    NotBase64DataUrl,
    #[error("invalid base64: {0}")]
    InvalidBase64(String),
}

/// Raw media bytes plus the MIME type announced by the data URL, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub mime: Option<String>,
    pub bytes: Bytes,
}

impl MediaPayload {
    pub fn new(bytes: impl Into<Bytes>, mime: Option<String>) -> Self {
        Self {
            mime,
            bytes: bytes.into(),
        }
    }

    /// Parses a data URL or a bare base64 string.
    pub fn decode(encoded: &str) -> Result<Self, MediaError> {
        let encoded = encoded.trim();
        let (mime, data) = match encoded.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',').ok_or(MediaError::NotBase64DataUrl)?;
                let mime = header
                    .strip_suffix(";base64")
                    .ok_or(MediaError::NotBase64DataUrl)?;
                let mime = (!mime.is_empty()).then(|| mime.to_string());
                (mime, data)
            }
            None => (None, encoded),
        };

        if data.is_empty() {
            return Err(MediaError::Empty);
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| MediaError::InvalidBase64(e.to_string()))?;
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        Ok(Self::new(bytes, mime))
    }

    /// Encodes the payload back into a data URL.
    pub fn to_data_url(&self) -> String {
        let data = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!(
            "data:{};base64,{}",
            self.mime.as_deref().unwrap_or("application/octet-stream"),
            data
        )
    }

    /// The MIME type to use for a multipart upload.
    pub fn mime_or(&self, default: &'static str) -> &str {
        self.mime.as_deref().unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
