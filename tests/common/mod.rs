//! In-memory collaborators for stream tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use msrp_chat::chat::{ChatStream, MediaStream};
use msrp_chat::config::{Config, ConnectionModel};
use msrp_chat::encryption::EncryptionOverlay;
use msrp_chat::negotiation::{Direction, MediaDescription};
use msrp_chat::payload::ChatIdentity;
use msrp_chat::stream::{SessionContext, StreamEvent};
use msrp_chat::transport::{
    ActiveChannel, ChunkChannel, Connector, ConnectorFactory, ConnectorSpec, EndpointHint, Incoming, IncomingChunk,
    MsrpUri, OutgoingChunk, Role, TransportError, TransportKind,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub type PeerSender = mpsc::UnboundedSender<Result<Incoming, TransportError>>;

/// How the mock connectors behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Normal,
    FailPrepare,
    HangPrepare,
    FailComplete,
}

/// What the connectors were asked to do.
#[derive(Debug, Default)]
pub struct NetworkLog {
    pub created: Vec<ConnectorSpec>,
    pub prepared: Vec<EndpointHint>,
    pub modes: Vec<Role>,
    pub completed: Vec<Vec<MsrpUri>>,
    pub cleanups: usize,
}

/// Send side of the mock channel; records everything.
#[derive(Default)]
pub struct MockChannel {
    pub sent: Mutex<Vec<OutgoingChunk>>,
    pub reports: Mutex<Vec<(String, u16, String)>>,
    pub fail_sends: AtomicBool,
    pub shutdowns: AtomicUsize,
    pub lost: AtomicBool,
}

impl MockChannel {
    pub fn sent(&self) -> Vec<OutgoingChunk> {
        self.sent.lock().clone()
    }

    pub fn reports(&self) -> Vec<(String, u16, String)> {
        self.reports.lock().clone()
    }
}

impl ChunkChannel for MockChannel {
    fn send_chunk(&self, chunk: OutgoingChunk) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::Send("broken pipe".to_string()));
            }
            self.sent.lock().push(chunk);
            Ok(())
        }
        .boxed()
    }

    fn send_report(&self, chunk: &IncomingChunk, code: u16, comment: &str) -> Result<(), TransportError> {
        self.reports
            .lock()
            .push((chunk.message_id.clone(), code, comment.to_string()));
        Ok(())
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        async move {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    fn lose_connection(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

/// Hands out mock connectors sharing one channel and one peer.
pub struct MockFactory {
    pub log: Arc<Mutex<NetworkLog>>,
    pub channel: Arc<MockChannel>,
    incoming: Arc<Mutex<Option<mpsc::UnboundedReceiver<Result<Incoming, TransportError>>>>>,
    behavior: Behavior,
}

impl MockFactory {
    pub fn new(behavior: Behavior) -> (Arc<Self>, PeerSender) {
        let (peer, incoming) = mpsc::unbounded_channel();
        let factory = Arc::new(Self {
            log: Arc::new(Mutex::new(NetworkLog::default())),
            channel: Arc::new(MockChannel::default()),
            incoming: Arc::new(Mutex::new(Some(incoming))),
            behavior,
        });
        (factory, peer)
    }
}

impl ConnectorFactory for MockFactory {
    fn create(&self, spec: &ConnectorSpec) -> Box<dyn Connector> {
        self.log.lock().created.push(spec.clone());
        Box::new(MockConnector {
            log: Arc::clone(&self.log),
            channel: Arc::clone(&self.channel),
            incoming: Arc::clone(&self.incoming),
            behavior: self.behavior,
            local: None,
        })
    }
}

struct MockConnector {
    log: Arc<Mutex<NetworkLog>>,
    channel: Arc<MockChannel>,
    incoming: Arc<Mutex<Option<mpsc::UnboundedReceiver<Result<Incoming, TransportError>>>>>,
    behavior: Behavior,
    local: Option<MsrpUri>,
}

impl Connector for MockConnector {
    fn local_uri(&self) -> Option<MsrpUri> {
        self.local.clone()
    }

    fn prepare(&mut self, hint: EndpointHint) -> BoxFuture<'_, Result<Vec<MsrpUri>, TransportError>> {
        async move {
            self.log.lock().prepared.push(hint.clone());
            match self.behavior {
                Behavior::FailPrepare => return Err(TransportError::Setup("no route to relay".to_string())),
                Behavior::HangPrepare => futures::future::pending::<()>().await,
                _ => {},
            }
            let uri = MsrpUri::new("192.0.2.1", Some(40000), hint.uri.secure).with_session_id("local1");
            self.local = Some(uri.clone());
            Ok(vec![uri])
        }
        .boxed()
    }

    fn complete(&mut self, remote_path: Vec<MsrpUri>) -> BoxFuture<'_, Result<ActiveChannel, TransportError>> {
        async move {
            self.log.lock().completed.push(remote_path);
            if self.behavior == Behavior::FailComplete {
                return Err(TransportError::Setup("connection refused".to_string()));
            }
            let incoming = self
                .incoming
                .lock()
                .take()
                .ok_or_else(|| TransportError::Setup("already completed".to_string()))?;
            let incoming = futures::stream::unfold(incoming, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed();
            let channel: Arc<dyn ChunkChannel> = self.channel.clone();
            Ok(ActiveChannel { channel, incoming })
        }
        .boxed()
    }

    fn cleanup(&mut self) {
        self.log.lock().cleanups += 1;
    }

    fn set_mode(&mut self, mode: Role) {
        self.log.lock().modes.push(mode);
    }
}

/// Session with fixed identities.
pub struct MockSession {
    pub local: ChatIdentity,
    pub remote: ChatIdentity,
    pub focus: bool,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            local: alice(),
            remote: bob(),
            focus: false,
        })
    }

    pub fn conference() -> Arc<Self> {
        Arc::new(Self {
            local: alice(),
            remote: ChatIdentity::parse("<sip:room@conference.example.com>").unwrap(),
            focus: true,
        })
    }
}

impl SessionContext for MockSession {
    fn local_identity(&self) -> Option<ChatIdentity> {
        Some(self.local.clone())
    }

    fn remote_identity(&self) -> Option<ChatIdentity> {
        Some(self.remote.clone())
    }

    fn remote_focus(&self) -> bool {
        self.focus
    }

    fn local_address(&self) -> String {
        "192.0.2.1".to_string()
    }
}

pub fn alice() -> ChatIdentity {
    ChatIdentity::parse("Alice <sip:alice@example.com>").unwrap()
}

pub fn bob() -> ChatIdentity {
    ChatIdentity::parse("Bob <sip:bob@example.org>").unwrap()
}

/// Direct TCP account.
pub fn direct_config() -> Config {
    let mut config = Config::default();
    config.account.uri = "alice@example.com".to_string();
    config.account.transport = TransportKind::Tcp;
    config.account.connection_model = ConnectionModel::Direct;
    config
}

/// Remote `m=message` section over TCP.
pub fn remote_media(accept_types: &str, accept_wrapped_types: Option<&str>, setup: &str) -> MediaDescription {
    let mut sdp = String::from(
        "m=message 2856 TCP/MSRP *\r\n\
         c=IN IP4 198.51.100.7\r\n\
         a=path:msrp://198.51.100.7:2856/remote1;tcp\r\n",
    );
    sdp.push_str(&format!("a=accept-types:{}\r\n", accept_types));
    if let Some(wrapped) = accept_wrapped_types {
        sdp.push_str(&format!("a=accept-wrapped-types:{}\r\n", wrapped));
    }
    sdp.push_str(&format!("a=setup:{}\r\n", setup));
    MediaDescription::parse(&sdp).unwrap()
}

/// Remote that accepts CPIM with text inside.
pub fn cpim_remote() -> MediaDescription {
    remote_media("message/cpim text/plain", Some("text/* application/im-iscomposing+xml"), "active")
}

/// Next event, failing the test after a timeout.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Skip events until one matches.
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<StreamEvent>,
    matches: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Assert nothing else arrives for a short while.
pub async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<StreamEvent>) {
    if let Ok(Some(event)) = timeout(Duration::from_millis(100), events.recv()).await {
        panic!("unexpected event {:?}", event);
    }
}

/// Poll until `condition` holds.
pub async fn eventually(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// A started stream wired to mocks.
pub struct Harness {
    pub stream: ChatStream,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub factory: Arc<MockFactory>,
    pub peer: PeerSender,
}

impl Harness {
    /// Stream that has not been initialized yet.
    pub fn new(config: Config, behavior: Behavior, overlay: Option<Arc<EncryptionOverlay>>) -> Self {
        let (factory, peer) = MockFactory::new(behavior);
        let stream = ChatStream::new(Arc::new(config), factory.clone(), overlay);
        let events = stream.subscribe();
        Self {
            stream,
            events,
            factory,
            peer,
        }
    }

    /// Outgoing stream started against `remote`.
    pub async fn started(remote: MediaDescription) -> Self {
        Self::started_with(direct_config(), MockSession::new(), remote, None).await
    }

    pub async fn started_with(
        config: Config,
        session: Arc<MockSession>,
        remote: MediaDescription,
        overlay: Option<Arc<EncryptionOverlay>>,
    ) -> Self {
        let mut harness = Self::new(config, Behavior::Normal, overlay);
        harness.stream.initialize(session, Direction::Outgoing).unwrap();
        assert_eq!(next_event(&mut harness.events).await, StreamEvent::DidInitialize);
        harness.stream.start(remote).unwrap();
        wait_for(&mut harness.events, |e| *e == StreamEvent::DidStart).await;
        harness
    }

    pub fn channel(&self) -> &MockChannel {
        &self.factory.channel
    }

    /// Deliver a request from the peer.
    pub fn receive(&self, chunk: IncomingChunk) {
        self.peer.send(Ok(Incoming::Request(chunk))).unwrap();
    }

    /// Body of the n-th sent chunk.
    pub fn sent_body(&self, index: usize) -> Bytes {
        self.channel().sent()[index].data.clone()
    }
}
