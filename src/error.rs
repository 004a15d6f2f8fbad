//! Chat stream error types.
//!
//! # Error Classification
//!
//! | Class         | Variant                 | Scope                                   |
//! |---------------|-------------------------|-----------------------------------------|
//! | Negotiation   | `Negotiation`           | Fatal to initialize/start, never retried |
//! | Per-message   | `MessageRejected`       | Fatal to one message, stream continues  |
//! | Parse         | `Cpim`, `Composing`     | Rejected with an error report to sender |
//! | Transport     | `Transport`             | Fatal to the stream unless shutting down |
//! | Encryption    | `Encryption`            | Classified by the secure channel itself |
//!
//! Layer-specific enums keep their own taxonomy and are preserved as the
//! `#[source]` of the crate-wide [`ChatError`].

use thiserror::Error;

use crate::encryption::OverlayError;
use crate::negotiation::NegotiationError;
use crate::payload::{ComposingParseError, CpimParseError};
use crate::transport::TransportError;

/// Chat stream errors.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Connection role / transport negotiation failed.
    #[error("Negotiation error: {0}")]
    Negotiation(#[source] NegotiationError),

    /// The message transport collaborator reported a failure.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// Malformed CPIM envelope.
    #[error("CPIM parser error: {0}")]
    Cpim(#[source] CpimParseError),

    /// Malformed composing indication document.
    #[error("Composing document error: {0}")]
    Composing(#[source] ComposingParseError),

    /// The encryption overlay rejected content.
    #[error("Encryption error: {0}")]
    Encryption(#[source] OverlayError),

    /// Remote media description cannot be handled by a chat stream.
    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    /// Remote media description is not a chat stream at all.
    #[error("Unknown stream type: {0}")]
    UnknownStream(String),

    /// A single outbound message could not be sent.
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// Invalid identity or URI.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Operation not supported by the remote end.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Operation not valid in the current stream state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for chat stream operations
pub type Result<T> = std::result::Result<T, ChatError>;

impl From<NegotiationError> for ChatError {
    fn from(err: NegotiationError) -> Self {
        ChatError::Negotiation(err)
    }
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        ChatError::Transport(err)
    }
}

impl From<CpimParseError> for ChatError {
    fn from(err: CpimParseError) -> Self {
        ChatError::Cpim(err)
    }
}

impl From<ComposingParseError> for ChatError {
    fn from(err: ComposingParseError) -> Self {
        ChatError::Composing(err)
    }
}

impl From<OverlayError> for ChatError {
    fn from(err: OverlayError) -> Self {
        ChatError::Encryption(err)
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(err: toml::de::Error) -> Self {
        ChatError::Config(err.to_string())
    }
}
