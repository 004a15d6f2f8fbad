//! Stream lifecycle.
//!
//! # State Machine
//!
//! ```text
//!   New ──initialize──▶ Initializing ──ok──▶ Initialized ──start──▶ Starting ──ok──▶ Started
//!                            │                                         │                │
//!                            └──err──▶ FailedInit                      └──err──▶ Failed ◀┘ read/send error
//!
//!   any ──end──▶ Ending ──▶ Ended
//! ```
//!
//! `initialize`, `start` and `end` each run as their own task. `end` cancels
//! whatever is still running, waits for it, then tears down in order. See
//! [`StreamCore`].

mod events;
mod lifecycle;

pub use events::{EventBus, FailureContext, StreamEvent};
pub use lifecycle::{StreamCore, StreamShared};

use futures::future::BoxFuture;

use crate::negotiation::MediaDescription;
use crate::payload::ChatIdentity;
use crate::transport::ActiveChannel;

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Created, nothing done yet
    New,
    /// Preparing the local endpoint
    Initializing,
    /// Local media ready
    Initialized,
    /// Initialization failed or was interrupted
    FailedInit,
    /// Completing the connection
    Starting,
    /// Connection established
    Started,
    /// Failed after initialization
    Failed,
    /// Teardown in progress
    Ending,
    /// Torn down
    Ended,
}

impl StreamState {
    /// Whether the stream can no longer be used.
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::FailedInit | StreamState::Ended)
    }
}

/// What the owning session provides to its streams.
pub trait SessionContext: Send + Sync {
    /// Our identity in this session.
    fn local_identity(&self) -> Option<ChatIdentity>;

    /// The peer's identity.
    fn remote_identity(&self) -> Option<ChatIdentity>;

    /// Whether the peer is a conference focus.
    fn remote_focus(&self) -> bool {
        false
    }

    /// Address to bind the local endpoint to.
    fn local_address(&self) -> String {
        "0.0.0.0".to_string()
    }
}

/// Remote media facts gathered during start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Remote media section
    pub remote_media: MediaDescription,
    /// Remote `accept-types`
    pub remote_accept_types: Vec<String>,
    /// Remote `accept-wrapped-types`
    pub remote_accept_wrapped_types: Vec<String>,
    /// Both ends accept `message/cpim`
    pub cpim_enabled: bool,
}

/// The message engine a stream activates once connected.
pub trait MessageSession: Send + Sync {
    /// Take over the established channel.
    fn attach(&self, channel: ActiveChannel, negotiated: Negotiated, session: std::sync::Arc<dyn SessionContext>);

    /// Called right after did-start was posted.
    fn started(&self);

    /// Stop the worker, resolve every outstanding message, close the
    /// channel gracefully. Returns whether a channel was attached.
    fn shutdown(&self) -> BoxFuture<'_, bool>;

    /// Resolve queued messages after a failed initialization.
    fn abandon(&self, reason: &str);

    /// Called after did-end or did-not-initialize.
    fn ended(&self);
}
