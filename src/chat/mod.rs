//! Chat streams.
//!
//! [`ChatStream`] is what a session owns: a [`StreamCore`] driving
//! negotiation and teardown, plus the message engine that queues, wraps and
//! tracks messages once the channel is up.
//!
//! # Example
//!
//! ```ignore
//! let stream = ChatStream::new(config, factory, None);
//! let mut events = stream.subscribe();
//! stream.validate_remote_media(&offer)?;
//! stream.initialize(session, Direction::Incoming)?;
//! // ... DidInitialize, answer with stream.local_media()
//! stream.start(offer)?;
//! let id = stream.send_message(ChatMessage::text("hello"));
//! ```

mod engine;
mod inbound;
mod message;

pub use message::{ChatMessage, MessageContent};

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::encryption::EncryptionOverlay;
use crate::error::{ChatError, Result};
use crate::negotiation::{Direction, MediaDescription, MismatchPhase, NegotiationError};
use crate::payload::{
    contains_mime_type, ChatIdentity, ComposingState, IsComposingDocument, Timestamp, COMPOSING_CONTENT_TYPE,
};
use crate::stream::{EventBus, MessageSession, SessionContext, StreamCore, StreamEvent, StreamShared, StreamState};
use crate::transport::{ConnectorFactory, Role};
use engine::ChatEngine;
use message::{new_message_id, QueuedMessage};

/// Operations every media stream offers its session.
pub trait MediaStream {
    /// Current lifecycle state.
    fn state(&self) -> StreamState;

    /// Local media section, once initialized.
    fn local_media(&self) -> Option<MediaDescription>;

    /// Remote media section, once started.
    fn remote_media(&self) -> Option<MediaDescription>;

    /// Prepare the local endpoint.
    fn initialize(&self, session: Arc<dyn SessionContext>, direction: Direction) -> Result<()>;

    /// Connect using the remote media section.
    fn start(&self, remote_media: MediaDescription) -> Result<()>;

    /// Tear down. Idempotent.
    fn end(&self) -> JoinHandle<()>;

    /// The session is going away; a clean close is not a failure.
    fn deactivate(&self);

    /// Subscribe to stream events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent>;
}

/// An MSRP chat stream.
pub struct ChatStream {
    config: Arc<Config>,
    core: Arc<StreamCore>,
    engine: Arc<ChatEngine>,
    overlay: Option<Arc<EncryptionOverlay>>,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("state", &self.core.state())
            .field("encryption", &self.overlay)
            .finish_non_exhaustive()
    }
}

impl ChatStream {
    /// Create a stream. `factory` builds the connectors negotiation picks;
    /// `overlay` wraps content once the secure channel is up.
    pub fn new(
        config: Arc<Config>,
        factory: Arc<dyn ConnectorFactory>,
        overlay: Option<Arc<EncryptionOverlay>>,
    ) -> Self {
        let events = EventBus::new();
        let shared = Arc::new(StreamShared::new(
            events.clone(),
            config.account.transport,
            config.account.tls_credentials.clone(),
        ));
        let engine = ChatEngine::new(Arc::clone(&shared), Arc::clone(&config), overlay.clone());
        if let Some(overlay) = &overlay {
            let target = Arc::downgrade(&engine);
            overlay.attach(
                events,
                Arc::new(move |data: Bytes| {
                    if let Some(engine) = target.upgrade() {
                        engine.enqueue(QueuedMessage::internal(data));
                    }
                }),
            );
        }
        let message_session: Arc<dyn MessageSession> = engine.clone();
        let core = StreamCore::new(Arc::clone(&config), factory, message_session, shared);
        Self {
            config,
            core,
            engine,
            overlay,
        }
    }

    /// Check an offered media section and remember its `setup` role.
    pub fn validate_remote_media(&self, remote: &MediaDescription) -> Result<()> {
        if remote.media != "message" {
            return Err(ChatError::UnknownStream(format!("media type {:?}", remote.media)));
        }
        let expected = self.config.account.transport.sdp_protocol();
        if remote.transport != expected {
            return Err(NegotiationError::TransportMismatch {
                phase: MismatchPhase::Negotiation,
                remote: remote.transport.clone(),
                local: expected.to_string(),
            }
            .into());
        }
        if remote.formats != ["*"] {
            return Err(ChatError::InvalidStream("wrong format list specified".to_string()));
        }
        let remote_role = remote
            .first("setup")
            .and_then(|setup| setup.parse::<Role>().ok())
            .unwrap_or(Role::Active);
        self.core.set_remote_role(remote_role);
        if remote.direction() != "sendrecv" {
            return Err(ChatError::InvalidStream(format!(
                "Unsupported direction for chat stream: {}",
                remote.direction()
            )));
        }
        if !remote.has("accept-types") {
            return Err(ChatError::InvalidStream(
                "remote SDP media does not have 'accept-types' attribute".to_string(),
            ));
        }
        let local_types = &self.config.chat.accept_types;
        if !remote
            .list("accept-types")
            .iter()
            .any(|mime_type| contains_mime_type(local_types, mime_type))
        {
            return Err(ChatError::InvalidStream("no compatible media types found".to_string()));
        }
        Ok(())
    }

    /// Queue a message; progress is reported under the returned id.
    pub fn send_message(&self, message: ChatMessage) -> String {
        let queued = QueuedMessage::new(message, true);
        let id = queued.id.clone();
        self.engine.enqueue(queued);
        id
    }

    /// Queue a composing indication. No progress events are posted for it.
    pub fn send_composing_indication(
        &self,
        state: ComposingState,
        refresh: Option<u32>,
        last_active: Option<Timestamp>,
        recipients: Vec<ChatIdentity>,
    ) -> String {
        let document = IsComposingDocument {
            state,
            last_active,
            content_type: Some("text".to_string()),
            refresh,
        };
        let message = ChatMessage::new(document.to_xml(), COMPOSING_CONTENT_TYPE).with_recipients(recipients);
        let queued = QueuedMessage::new(message, false);
        let id = queued.id.clone();
        self.engine.enqueue(queued);
        id
    }

    /// Ask the chat room for a nickname. Answered by did-set-nickname or
    /// did-not-set-nickname under the returned id.
    pub fn set_local_nickname(&self, nickname: &str) -> Result<String> {
        if !self.nickname_allowed() {
            return Err(ChatError::NotSupported("Setting nickname is not supported".to_string()));
        }
        let id = new_message_id();
        self.engine.send_nickname(nickname.to_string(), id.clone());
        Ok(id)
    }

    /// Queue secure-channel protocol data, skipping the content transform.
    pub fn inject_encryption_message(&self, data: Bytes) {
        self.engine.enqueue(QueuedMessage::internal(data));
    }

    /// Encryption overlay, if configured.
    pub fn encryption(&self) -> Option<&Arc<EncryptionOverlay>> {
        self.overlay.as_ref()
    }

    /// Whether both ends accept CPIM. False until started.
    pub fn cpim_enabled(&self) -> bool {
        self.engine.link().is_some_and(|link| link.negotiated.cpim_enabled)
    }

    /// Capabilities announced by a conference focus.
    pub fn chatroom_capabilities(&self) -> Vec<String> {
        self.engine
            .link()
            .map(|link| link.chatroom_capabilities())
            .unwrap_or_default()
    }

    /// Whether private messages can be sent through the focus.
    pub fn private_messages_allowed(&self) -> bool {
        self.engine.link().is_some_and(|link| link.private_messages_allowed())
    }

    /// Whether the focus accepts nickname requests.
    pub fn nickname_allowed(&self) -> bool {
        self.chatroom_capabilities().iter().any(|c| c == "nickname")
    }

    /// First recorded failure.
    pub fn failure_reason(&self) -> Option<String> {
        self.core.shared().failure_reason()
    }
}

impl MediaStream for ChatStream {
    fn state(&self) -> StreamState {
        self.core.state()
    }

    fn local_media(&self) -> Option<MediaDescription> {
        self.core.local_media()
    }

    fn remote_media(&self) -> Option<MediaDescription> {
        self.core.remote_media()
    }

    fn initialize(&self, session: Arc<dyn SessionContext>, direction: Direction) -> Result<()> {
        self.core.initialize(session, direction)
    }

    fn start(&self, remote_media: MediaDescription) -> Result<()> {
        self.core.start(remote_media)
    }

    fn end(&self) -> JoinHandle<()> {
        self.core.end()
    }

    fn deactivate(&self) {
        self.core.shared().deactivate();
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        self.core.shared().events().subscribe()
    }
}
