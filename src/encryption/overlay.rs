//! Per-stream encryption overlay.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{ChannelCallback, OverlayError, SecureChannel, SecureChannelEvent, TrustStore, TrustedPeer};
use crate::stream::{EventBus, StreamEvent};

/// Cipher reported while the session is encrypted.
pub const CIPHER: &str = "AES-128-CTR";

/// Sends protocol-internal data to the peer, bypassing the overlay.
pub type Injector = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Wraps one secure-channel session and the trust state around it.
pub struct EncryptionOverlay {
    channel: Arc<dyn SecureChannel>,
    trust: TrustStore,
    peer_name: Mutex<Option<String>>,
    events: Mutex<Option<EventBus>>,
}

impl std::fmt::Debug for EncryptionOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionOverlay")
            .field("active", &self.active())
            .field("peer_name", &*self.peer_name.lock())
            .finish_non_exhaustive()
    }
}

impl EncryptionOverlay {
    /// Create an overlay around `channel`, checking peers against `trust`.
    pub fn new(channel: Arc<dyn SecureChannel>, trust: TrustStore) -> Self {
        Self {
            channel,
            trust,
            peer_name: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    /// Route channel notifications to the stream's bus and protocol data to
    /// `inject`.
    pub fn attach(&self, events: EventBus, inject: Injector) {
        let bus = events.clone();
        let callback: ChannelCallback = Arc::new(move |event| match event {
            SecureChannelEvent::Outbound(data) => inject(data),
            SecureChannelEvent::StateChanged(state) => {
                tracing::debug!("Secure channel state is now {}", state);
                bus.post(StreamEvent::EncryptionStateChanged { state });
            },
            SecureChannelEvent::SmpDidStart { originator, question } => {
                bus.post(StreamEvent::SmpVerificationDidStart { originator, question });
            },
            SecureChannelEvent::SmpDidNotStart { reason } => {
                bus.post(StreamEvent::SmpVerificationDidNotStart { reason });
            },
            SecureChannelEvent::SmpDidEnd {
                status,
                same_secrets,
                reason,
            } => {
                bus.post(StreamEvent::SmpVerificationDidEnd {
                    status,
                    same_secrets,
                    reason,
                });
            },
        });
        self.channel.attach(callback);
        *self.events.lock() = Some(events);
    }

    /// Stop the session and drop the stream wiring.
    pub fn detach(&self) {
        if self.events.lock().take().is_some() {
            self.channel.stop();
            self.channel.detach();
        }
    }

    /// Start the handshake.
    pub fn start(&self) {
        self.channel.start();
    }

    /// End the encrypted session.
    pub fn stop(&self) {
        self.channel.stop();
    }

    /// Whether content is currently encrypted.
    pub fn active(&self) -> bool {
        self.channel.is_encrypted()
    }

    /// Cipher in use, when active.
    pub fn cipher(&self) -> Option<&'static str> {
        self.active().then_some(CIPHER)
    }

    /// Hex fingerprint of our key.
    pub fn key_fingerprint(&self) -> Option<String> {
        self.channel.local_fingerprint().map(hex::encode)
    }

    /// Hex fingerprint of the peer's key.
    pub fn peer_fingerprint(&self) -> Option<String> {
        self.channel.peer_fingerprint().map(hex::encode)
    }

    /// Peer name: cached value, else the trusted record's description.
    pub fn peer_name(&self) -> String {
        let mut cached = self.peer_name.lock();
        if let Some(name) = cached.as_ref() {
            return name.clone();
        }
        let description = self
            .peer_fingerprint()
            .and_then(|fp| self.trust.read().get(&fp).map(|peer| peer.description.clone()));
        match description {
            Some(description) => {
                *cached = Some(description.clone());
                description
            },
            None => String::new(),
        }
    }

    /// Rename the peer; updates the trusted record if there is one.
    pub fn set_peer_name(&self, name: impl Into<String>) {
        let name = name.into();
        let old = self.peer_name();
        *self.peer_name.lock() = Some(name.clone());
        if old == name {
            return;
        }
        if let Some(fp) = self.peer_fingerprint() {
            if let Some(peer) = self.trust.write().get_mut(&fp) {
                peer.description = name.clone();
            }
        }
        self.post(StreamEvent::PeerNameChanged { name });
    }

    /// Whether the peer's fingerprint is trusted.
    pub fn verified(&self) -> bool {
        self.peer_fingerprint()
            .is_some_and(|fp| self.trust.read().contains(&fp))
    }

    /// Trust or distrust the peer. No-op until the peer key is known.
    pub fn set_verified(&self, verified: bool) {
        let Some(fp) = self.peer_fingerprint() else {
            return;
        };
        if self.trust.read().contains(&fp) == verified {
            return;
        }
        if verified {
            let description = self.peer_name();
            self.trust.write().add(TrustedPeer::new(fp, description));
        } else {
            self.trust.write().remove(&fp);
        }
        self.post(StreamEvent::VerificationStateChanged { verified });
    }

    /// Start SMP.
    pub fn smp_verify(&self, secret: &str, question: Option<&str>) {
        self.channel.smp_verify(secret, question);
    }

    /// Answer SMP.
    pub fn smp_answer(&self, secret: &str) {
        self.channel.smp_answer(secret);
    }

    /// Abort SMP.
    pub fn smp_abort(&self) {
        self.channel.smp_abort();
    }

    pub(crate) fn handle_output(&self, content: Bytes, content_type: &str) -> Result<Bytes, OverlayError> {
        self.channel.handle_output(content, content_type)
    }

    pub(crate) fn handle_input(&self, content: Bytes, content_type: &str) -> Result<Bytes, OverlayError> {
        self.channel.handle_input(content, content_type)
    }

    fn post(&self, event: StreamEvent) {
        if let Some(bus) = self.events.lock().as_ref() {
            bus.post(event);
        }
    }
}
