//! Error taxonomy for the relay.
//!
//! Every failure while handling an inbound message is one of four kinds. The
//! kind is used for logging only; on the wire all of them collapse into a
//! single `{ message }` payload.

use std::fmt;

/// Message sent to the client when a failure carries no text of its own.
pub const FALLBACK_ERROR_MESSAGE: &str = "Sorry, I encountered an error processing your message.";

/// Stable, machine-readable name of a [`RelayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    InvalidType,
    ProviderFailure,
    NoContent,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidType => "invalid_type",
            ErrorKind::ProviderFailure => "provider_failure",
            ErrorKind::NoContent => "no_content",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure while turning one inbound message into a reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    /// The payload for the declared kind is missing or malformed.
    #[error("{0}")]
    InvalidInput(String),
    /// The `type` discriminator is missing or unknown.
    #[error("Invalid message type")]
    InvalidType,
    /// A downstream completion or classification call failed.
    #[error("{0}")]
    Provider(String),
    /// The completion provider answered but produced no text.
    #[error("No response generated from the language model")]
    NoContent,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::InvalidInput(_) => ErrorKind::InvalidInput,
            RelayError::InvalidType => ErrorKind::InvalidType,
            RelayError::Provider(_) => ErrorKind::ProviderFailure,
            RelayError::NoContent => ErrorKind::NoContent,
        }
    }

    /// Wraps a provider failure, keeping its top-level message verbatim.
    ///
    /// Falls back to [`FALLBACK_ERROR_MESSAGE`] when the error renders as an
    /// empty string.
    pub fn provider(err: &anyhow::Error) -> Self {
        let message = err.to_string();
        if message.trim().is_empty() {
            RelayError::Provider(FALLBACK_ERROR_MESSAGE.to_string())
        } else {
            RelayError::Provider(message)
        }
    }

    /// The text surfaced to the client for this error.
    pub fn client_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            FALLBACK_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }
}
