//! Seam to the MSRP transport collaborator.
//!
//! The collaborator owns sockets, TLS, relay hairpinning and chunk framing.
//! The chat stream only drives it through two traits:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               ChatStream                 │
//! └───────────┬─────────────────┬────────────┘
//!             │ prepare/complete│ send_chunk / send_report
//!             ▼                 ▼
//! ┌──────────────────┐  ┌──────────────────────┐
//! │    Connector     │─▶│     ChunkChannel     │
//! │ (direct / relay) │  │ + stream of Incoming │
//! └──────────────────┘  └──────────────────────┘
//! ```
//!
//! A [`Connector`] is created from a [`ConnectorSpec`] by the
//! [`ConnectorFactory`] supplied by the host application, prepares the local
//! endpoint path, and on completion yields an [`ActiveChannel`].

mod chunk;
mod uri;

pub use chunk::{
    ContinuationFlag, Incoming, IncomingChunk, Method, OutgoingChunk, ReportRequest, Status, TransactionResponse,
};
pub use uri::{format_path, parse_path, MsrpUri, DEFAULT_MSRP_PORT};

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RelayConfig;

/// MSRP transport selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP
    Tcp,
    /// TLS over TCP (default)
    #[default]
    Tls,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls => "tls",
        }
    }

    /// SDP transport protocol for a chat media line.
    pub fn sdp_protocol(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP/MSRP",
            Self::Tls => "TCP/TLS/MSRP",
        }
    }

    /// Transport implied by an MSRP URI scheme.
    pub fn from_uri(uri: &MsrpUri) -> Self {
        if uri.secure {
            Self::Tls
        } else {
            Self::Tcp
        }
    }

    /// Whether URIs for this transport use `msrps`.
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Tls)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "tls" => Ok(Self::Tls),
            _ => Err(format!("Unknown transport kind: {}", s)),
        }
    }
}

/// Connection setup role (`a=setup`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Opens the connection
    Active,
    /// Accepts the connection
    Passive,
    /// Either; the answer decides
    Actpass,
}

impl Role {
    /// Attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::Actpass => "actpass",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "passive" => Ok(Self::Passive),
            "actpass" => Ok(Self::Actpass),
            _ => Err(format!("Unknown setup role: {}", s)),
        }
    }
}

/// Transport collaborator errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection was closed cleanly.
    #[error("Connection was closed cleanly")]
    ConnectionDone,

    /// The connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Endpoint preparation or completion failed.
    #[error("Transport setup failed: {0}")]
    Setup(String),

    /// A chunk could not be sent.
    #[error("Send failed: {0}")]
    Send(String),

    /// Malformed MSRP URI.
    #[error("Invalid MSRP URI: {0}")]
    InvalidUri(String),
}

impl TransportError {
    /// Clean close, as opposed to a failure.
    pub fn is_connection_done(&self) -> bool {
        matches!(self, Self::ConnectionDone)
    }
}

/// What kind of endpoint a connector prepares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorSpec {
    /// Direct connection we open
    DirectConnector,
    /// Direct connection we accept
    DirectAcceptor,
    /// Relayed endpoint reserved at `relay`
    Relay {
        /// Relay coordinates
        relay: RelayConfig,
        /// Connection mode at the relay
        mode: Role,
    },
}

impl ConnectorSpec {
    /// Whether this is a relayed endpoint.
    pub fn is_relay(&self) -> bool {
        matches!(self, Self::Relay { .. })
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectConnector => "direct-connector",
            Self::DirectAcceptor => "direct-acceptor",
            Self::Relay { .. } => "relay",
        }
    }
}

/// Local endpoint hint passed to [`Connector::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHint {
    /// Local address, scheme and (possibly zero) port
    pub uri: MsrpUri,
    /// TLS credentials reference in effect
    pub credentials: Option<String>,
}

/// An established chunk channel plus the stream of what it receives.
pub struct ActiveChannel {
    /// Send side
    pub channel: Arc<dyn ChunkChannel>,
    /// Receive side; ends or errors when the connection goes away
    pub incoming: BoxStream<'static, Result<Incoming, TransportError>>,
}

impl std::fmt::Debug for ActiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveChannel").finish_non_exhaustive()
    }
}

/// Two-phase endpoint setup.
pub trait Connector: Send {
    /// Local URI allocated by [`Connector::prepare`], if any.
    fn local_uri(&self) -> Option<MsrpUri>;

    /// Allocate the local endpoint and return the path to advertise.
    fn prepare(&mut self, hint: EndpointHint) -> BoxFuture<'_, Result<Vec<MsrpUri>, TransportError>>;

    /// Connect to (or accept) the remote path.
    fn complete(&mut self, remote_path: Vec<MsrpUri>) -> BoxFuture<'_, Result<ActiveChannel, TransportError>>;

    /// Release anything prepared.
    fn cleanup(&mut self);

    /// Change the relay connection mode. Direct connectors ignore this.
    fn set_mode(&mut self, mode: Role);
}

/// Builds connectors for the negotiation engine.
pub trait ConnectorFactory: Send + Sync {
    /// Create a connector for `spec`.
    fn create(&self, spec: &ConnectorSpec) -> Box<dyn Connector>;
}

/// Send side of an active channel.
pub trait ChunkChannel: Send + Sync {
    /// Submit a request. Resolves once the transport accepted it; the
    /// transaction response arrives later as [`Incoming::Response`].
    fn send_chunk(&self, chunk: OutgoingChunk) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Respond to a received request.
    fn send_report(&self, chunk: &IncomingChunk, code: u16, comment: &str) -> Result<(), TransportError>;

    /// Graceful close.
    fn shutdown(&self) -> BoxFuture<'_, ()>;

    /// Forced disconnect.
    fn lose_connection(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!(TransportKind::from_str("tcp").unwrap(), TransportKind::Tcp);
        assert_eq!(TransportKind::from_str("TLS").unwrap(), TransportKind::Tls);
        assert!(TransportKind::from_str("quic").is_err());
        assert_eq!(TransportKind::default(), TransportKind::Tls);
        assert_eq!(TransportKind::Tls.sdp_protocol(), "TCP/TLS/MSRP");
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("actpass").unwrap(), Role::Actpass);
        assert_eq!(Role::from_str(" Passive").unwrap(), Role::Passive);
        assert!(Role::from_str("holdconn").is_err());
        assert_eq!(Role::Active.to_string(), "active");
    }

    #[test]
    fn test_transport_from_uri() {
        let uri = MsrpUri::parse("msrps://host/abc;tcp").unwrap();
        assert_eq!(TransportKind::from_uri(&uri), TransportKind::Tls);
        assert!(ConnectorSpec::DirectAcceptor.name().starts_with("direct"));
    }
}
