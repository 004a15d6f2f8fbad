//! Connection role and transport negotiation.
//!
//! Negotiation happens in three steps that mirror the offer/answer exchange
//! of the owning session:
//!
//! ```text
//!  decide()                 prepare()                apply_remote_setup()     complete()
//! ┌──────────┐  plan   ┌──────────────┐ local path ┌──────────────────┐      ┌──────────────┐
//! │ account  │────────▶│  connector   │───────────▶│ actpass+passive? │─────▶│ remote path  │
//! │ + remote │         │  (direct or  │   (offer)  │  → switch active │      │ → channel    │
//! │   role   │         │   relay)     │            └──────────────────┘      └──────────────┘
//! └──────────┘         └──────────────┘
//! ```
//!
//! # Decision Table
//!
//! | Account        | Direction | Remote role        | Connector         | Local role |
//! |----------------|-----------|--------------------|-------------------|------------|
//! | local network  | outgoing  | -                  | direct connector  | active     |
//! | local network  | incoming  | -                  | direct acceptor   | passive    |
//! | relay          | incoming  | actpass / passive  | direct connector  | active     |
//! | relay          | outgoing  | (no relay / opted out) | direct connector | active  |
//! | relay          | outgoing  | -                  | relay (passive)   | actpass    |
//! | relay          | incoming  | active             | relay (passive)   | passive    |
//! | direct         | incoming  | actpass / passive  | direct connector  | active     |
//! | direct         | outgoing  | -                  | direct acceptor   | actpass    |
//! | direct         | incoming  | active             | direct acceptor   | passive    |

mod engine;
mod plan;
mod sdp;

pub use engine::NegotiationEngine;
pub use plan::{decide, ConnectionPlan, NegotiationInput};
pub use sdp::{build_local_media, MediaDescription};

pub use crate::config::ConnectionModel;
pub use crate::transport::{Role, TransportKind};

use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

/// Which side started the owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We sent the offer
    Outgoing,
    /// We answer an offer
    Incoming,
}

impl Direction {
    /// Whether this is the outgoing side.
    pub fn is_outgoing(self) -> bool {
        matches!(self, Direction::Outgoing)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        })
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// Where a transport mismatch was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchPhase {
    /// While validating the remote media description
    Negotiation,
    /// While matching the remote path before completion
    Completion,
}

impl fmt::Display for MismatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MismatchPhase::Negotiation => "negotiation",
            MismatchPhase::Completion => "completion",
        })
    }
}

/// Negotiation failures. All of them are fatal to the stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// Incoming TLS without a local certificate.
    #[error("Cannot accept MSRP connection without a TLS certificate")]
    NoCertificate,

    /// Local and remote transports differ.
    #[error("remote transport ('{remote}') different from local transport ('{local}')")]
    TransportMismatch {
        /// Phase that detected it
        phase: MismatchPhase,
        /// Remote transport
        remote: String,
        /// Local transport
        local: String,
    },

    /// Configured relay uses another transport than the account.
    #[error("MSRP relay transport conflicts with MSRP transport setting")]
    RelayConflict,

    /// Relay model without any relay coordinates or account domain.
    #[error("No MSRP relay configured and account has no domain")]
    MissingRelay,

    /// Remote media lacks the `path` attribute.
    #[error("remote SDP media does not have 'path' attribute")]
    MissingPath,

    /// Start requested without a prepared endpoint.
    #[error("Stream was not initialized")]
    NotInitialized,

    /// Remote media content cannot be used.
    #[error("Invalid remote media: {0}")]
    InvalidMedia(String),

    /// The connector collaborator failed.
    #[error("{0}")]
    Connector(#[source] TransportError),
}

impl From<TransportError> for NegotiationError {
    fn from(err: TransportError) -> Self {
        NegotiationError::Connector(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message() {
        let err = NegotiationError::TransportMismatch {
            phase: MismatchPhase::Completion,
            remote: "tcp".to_string(),
            local: "tls".to_string(),
        };
        assert_eq!(err.to_string(), "remote transport ('tcp') different from local transport ('tls')");
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("Outgoing".parse::<Direction>().unwrap(), Direction::Outgoing);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
