//! Stream events and their fan-out.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::chat::ChatMessage;
use crate::encryption::{EncryptionState, SmpOriginator, SmpStatus};
use crate::payload::{ChatIdentity, ComposingState, Timestamp};
use crate::transport::TransportKind;

/// Sub-step a stream failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureContext {
    /// Reading the remote description and matching transports
    SdpNegotiation,
    /// Completing the connection
    Start,
    /// Reading from the established channel
    Reading,
    /// Sending on the established channel
    Sending,
}

impl FailureContext {
    /// Context tag.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureContext::SdpNegotiation => "sdp_negotiation",
            FailureContext::Start => "start",
            FailureContext::Reading => "reading",
            FailureContext::Sending => "sending",
        }
    }
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a chat stream reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    // Lifecycle
    /// Local endpoint prepared; local media is available
    DidInitialize,
    /// Initialization failed or was interrupted
    DidNotInitialize {
        /// Reason
        reason: String,
        /// Transport in effect
        transport: TransportKind,
        /// TLS credentials reference in effect
        credentials: Option<String>,
    },
    /// Connection established
    DidStart,
    /// Stream failed
    DidFail {
        /// Failing sub-step
        context: FailureContext,
        /// Reason
        reason: String,
        /// Transport in effect
        transport: TransportKind,
        /// TLS credentials reference in effect
        credentials: Option<String>,
    },
    /// Teardown begins
    WillEnd,
    /// Teardown finished
    DidEnd {
        /// First recorded failure, if any
        error: Option<String>,
    },

    // Outbound messages
    /// Message handed to the transport, reports pending
    DidSendMessage {
        /// Message id
        message_id: String,
    },
    /// Success report received
    DidDeliverMessage {
        /// Message id
        message_id: String,
        /// Report code
        code: u16,
        /// Report comment
        reason: String,
    },
    /// Message will never be delivered
    DidNotDeliverMessage {
        /// Message id
        message_id: String,
        /// Report or response code; 0 for local failures
        code: u16,
        /// Reason
        reason: String,
    },

    // Inbound messages
    /// A message arrived
    GotMessage {
        /// The message
        message: ChatMessage,
        /// Sent privately through a conference focus
        private: bool,
        /// Content was decrypted
        encrypted: bool,
        /// Encryption was active when it arrived
        encryption_active: bool,
    },
    /// A composing indication arrived
    GotComposingIndication {
        /// Active or idle
        state: ComposingState,
        /// Refresh interval in seconds
        refresh: u32,
        /// Kind of content being composed
        content_type: Option<String>,
        /// Last activity
        last_active: Option<Timestamp>,
        /// Sender
        sender: Option<ChatIdentity>,
        /// Recipients
        recipients: Vec<ChatIdentity>,
        /// Sent privately through a conference focus
        private: bool,
        /// Content was decrypted
        encrypted: bool,
        /// Encryption was active when it arrived
        encryption_active: bool,
    },

    // Chat room
    /// Nickname accepted
    DidSetNickname {
        /// Request id
        message_id: String,
    },
    /// Nickname refused
    DidNotSetNickname {
        /// Request id
        message_id: String,
        /// Response code
        code: u16,
        /// Response comment
        reason: String,
    },

    // Encryption
    /// Secure channel state changed
    EncryptionStateChanged {
        /// New state
        state: EncryptionState,
    },
    /// Peer verification flag changed
    VerificationStateChanged {
        /// New flag
        verified: bool,
    },
    /// Cached peer name changed
    PeerNameChanged {
        /// New name
        name: String,
    },
    /// Secure channel error
    EncryptionError {
        /// Description
        error: String,
    },
    /// SMP started
    SmpVerificationDidStart {
        /// Who started it
        originator: SmpOriginator,
        /// Question, if any
        question: Option<String>,
    },
    /// SMP could not start
    SmpVerificationDidNotStart {
        /// Why
        reason: String,
    },
    /// SMP finished
    SmpVerificationDidEnd {
        /// Outcome
        status: SmpStatus,
        /// Whether both secrets matched
        same_secrets: Option<bool>,
        /// Failure reason
        reason: Option<String>,
    },
}

impl StreamEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::DidInitialize => "DidInitialize",
            StreamEvent::DidNotInitialize { .. } => "DidNotInitialize",
            StreamEvent::DidStart => "DidStart",
            StreamEvent::DidFail { .. } => "DidFail",
            StreamEvent::WillEnd => "WillEnd",
            StreamEvent::DidEnd { .. } => "DidEnd",
            StreamEvent::DidSendMessage { .. } => "DidSendMessage",
            StreamEvent::DidDeliverMessage { .. } => "DidDeliverMessage",
            StreamEvent::DidNotDeliverMessage { .. } => "DidNotDeliverMessage",
            StreamEvent::GotMessage { .. } => "GotMessage",
            StreamEvent::GotComposingIndication { .. } => "GotComposingIndication",
            StreamEvent::DidSetNickname { .. } => "DidSetNickname",
            StreamEvent::DidNotSetNickname { .. } => "DidNotSetNickname",
            StreamEvent::EncryptionStateChanged { .. } => "EncryptionStateChanged",
            StreamEvent::VerificationStateChanged { .. } => "VerificationStateChanged",
            StreamEvent::PeerNameChanged { .. } => "PeerNameChanged",
            StreamEvent::EncryptionError { .. } => "EncryptionError",
            StreamEvent::SmpVerificationDidStart { .. } => "SmpVerificationDidStart",
            StreamEvent::SmpVerificationDidNotStart { .. } => "SmpVerificationDidNotStart",
            StreamEvent::SmpVerificationDidEnd { .. } => "SmpVerificationDidEnd",
        }
    }

    /// Shorthand for a local delivery failure.
    pub fn not_delivered(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamEvent::DidNotDeliverMessage {
            message_id: message_id.into(),
            code: 0,
            reason: reason.into(),
        }
    }
}

/// Fan-out of [`StreamEvent`]s to any number of subscribers.
///
/// Each subscriber gets its own unbounded channel; closed subscribers are
/// pruned on the next post.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<StreamEvent>>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event posted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to all subscribers.
    pub fn post(&self, event: StreamEvent) {
        tracing::trace!("Posting {}", event.name());
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}
