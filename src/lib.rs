//! # MSRP Chat Core
//!
//! Chat streams for SIP sessions: connection negotiation over MSRP, an
//! outbound queue with delivery tracking, inbound chunk dispatch, the CPIM
//! envelope and composing-indication codecs, and an optional end-to-end
//! encryption overlay.
//!
//! The byte-level MSRP transport and the secure-channel protocol are
//! collaborators reached through traits ([`transport::ConnectorFactory`],
//! [`transport::ChunkChannel`], [`encryption::SecureChannel`]); this crate
//! owns everything between them and the session.
//!
//! ## Architecture
//!
//! ```text
//!             Session (offer/answer, identities)
//!                          │
//!                          ▼
//!  ┌──────────────────── ChatStream ─────────────────────┐
//!  │  StreamCore            ChatEngine                   │
//!  │  initialize ─▶ plan    queue ─▶ worker ─▶ send_chunk │
//!  │  start ─▶ complete     reader ◀─ incoming chunks     │
//!  │  end ─▶ drain, close   pending set, reassembly      │
//!  └─────────┬───────────────────────┬───────────────────┘
//!            ▼                       ▼
//!     Connector (direct / relay)   EncryptionOverlay ─▶ SecureChannel
//! ```
//!
//! ### Wire Forms
//!
//! | Form      | Content-Type                     | When                                        |
//! |-----------|----------------------------------|---------------------------------------------|
//! | CPIM      | `message/cpim`                   | Metadata present, or preferred and accepted |
//! | Simple    | the content's own type           | Default sender/recipient, type accepted     |
//! | Composing | `application/im-iscomposing+xml` | Typing notifications                        |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use msrp_chat::{ChatMessage, ChatStream, Config, Direction, MediaStream};
//!
//! let stream = ChatStream::new(Arc::new(Config::from_env()), factory, None);
//! let mut events = stream.subscribe();
//!
//! stream.initialize(session.clone(), Direction::Outgoing)?;
//! // DidInitialize -> put stream.local_media() in the offer
//! stream.start(answer_media)?;
//! // DidStart
//! let id = stream.send_message(ChatMessage::text("Hello"));
//! // DidSendMessage { id }, then DidDeliverMessage or DidNotDeliverMessage
//! stream.end().await?;
//! ```
//!
//! ## Modules
//!
//! - [`chat`]: Chat stream facade and message engine
//! - [`stream`]: Lifecycle state machine and events
//! - [`negotiation`]: Connection role / transport decisions and SDP media
//! - [`payload`]: CPIM, simple and composing codecs
//! - [`transport`]: MSRP URIs, chunks and the transport collaborator traits
//! - [`encryption`]: Encryption overlay and trust store
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod chat;
pub mod config;
pub mod encryption;
pub mod error;
pub mod negotiation;
pub mod payload;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use chat::{ChatMessage, ChatStream, MediaStream, MessageContent};
pub use config::Config;
pub use encryption::{EncryptionOverlay, TrustedPeerSet};
pub use error::{ChatError, Result};
pub use negotiation::{Direction, MediaDescription};
pub use payload::{ChatIdentity, CpimPayload, IsComposingDocument, MultilingualText};
pub use stream::{SessionContext, StreamEvent, StreamState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
