//! End-to-end encryption overlay.
//!
//! The handshake and cipher live in an external secure-channel library
//! reached through [`SecureChannel`]. This module keeps what the chat stream
//! owns itself: the trust store, the peer name cache, and the wiring of the
//! channel's lifecycle to the stream's.
//!
//! # Error Classification
//!
//! | Variant            | Inbound handling                         | Outbound handling      |
//! |--------------------|------------------------------------------|------------------------|
//! | `Ignore`           | 200, no event                            | message fails          |
//! | `Unencrypted`      | continue, `encrypted = false`            | message fails          |
//! | `EncryptedMessage` | 400 + `EncryptionError` event            | message fails          |
//! | `Protocol`         | 200 + `EncryptionError` event            | stream fails           |

mod overlay;
mod trust;

pub use overlay::{EncryptionOverlay, Injector, CIPHER};
pub use trust::{TrustStore, TrustedPeer, TrustedPeerSet};

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

/// Errors raised by the secure channel's content transforms.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// Protocol-internal message consumed by the channel.
    #[error("Message consumed by the secure channel")]
    Ignore,

    /// Plaintext received while encryption is active.
    #[error("Unencrypted message received while encryption is active")]
    Unencrypted,

    /// This message could not be decrypted.
    #[error("{0}")]
    EncryptedMessage(String),

    /// The secure session itself is broken.
    #[error("{0}")]
    Protocol(String),
}

/// Secure channel session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionState {
    /// No encryption
    Plaintext,
    /// Encrypted session established
    Encrypted,
    /// Remote ended the encrypted session
    Finished,
}

impl fmt::Display for EncryptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EncryptionState::Plaintext => "plaintext",
            EncryptionState::Encrypted => "encrypted",
            EncryptionState::Finished => "finished",
        })
    }
}

/// Who started an SMP verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpOriginator {
    /// We asked
    Local,
    /// The peer asked
    Remote,
}

/// Outcome of an SMP verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpStatus {
    /// Completed; see `same_secrets`
    Success,
    /// Aborted by either side
    Interrupted,
    /// Protocol failure
    ProtocolError,
}

/// Notifications from the secure channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecureChannelEvent {
    /// Session state changed
    StateChanged(EncryptionState),
    /// Protocol-internal data to send to the peer
    Outbound(Bytes),
    /// SMP started
    SmpDidStart {
        /// Who started it
        originator: SmpOriginator,
        /// Question, if any
        question: Option<String>,
    },
    /// SMP could not start
    SmpDidNotStart {
        /// Why
        reason: String,
    },
    /// SMP finished
    SmpDidEnd {
        /// Outcome
        status: SmpStatus,
        /// Whether both secrets matched
        same_secrets: Option<bool>,
        /// Failure reason
        reason: Option<String>,
    },
}

/// Callback the channel reports through.
pub type ChannelCallback = Arc<dyn Fn(SecureChannelEvent) + Send + Sync>;

/// External secure-channel session bound to one stream.
pub trait SecureChannel: Send + Sync {
    /// Route channel notifications to `callback` until [`SecureChannel::detach`].
    fn attach(&self, callback: ChannelCallback);

    /// Stop reporting.
    fn detach(&self);

    /// Start the handshake.
    fn start(&self);

    /// End the encrypted session.
    fn stop(&self);

    /// Whether the session is currently encrypted.
    fn is_encrypted(&self) -> bool;

    /// Transform outbound content.
    fn handle_output(&self, content: Bytes, content_type: &str) -> Result<Bytes, OverlayError>;

    /// Transform inbound content.
    fn handle_input(&self, content: Bytes, content_type: &str) -> Result<Bytes, OverlayError>;

    /// Raw local public key fingerprint.
    fn local_fingerprint(&self) -> Option<Vec<u8>>;

    /// Raw peer public key fingerprint, once known.
    fn peer_fingerprint(&self) -> Option<Vec<u8>>;

    /// Start SMP with a shared secret.
    fn smp_verify(&self, secret: &str, question: Option<&str>);

    /// Answer the peer's SMP.
    fn smp_answer(&self, secret: &str);

    /// Abort SMP.
    fn smp_abort(&self);
}
