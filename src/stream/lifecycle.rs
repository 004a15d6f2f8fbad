//! Stream lifecycle driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{EventBus, FailureContext, MessageSession, Negotiated, SessionContext, StreamEvent, StreamState};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::negotiation::{
    build_local_media, decide, Direction, MediaDescription, NegotiationEngine, NegotiationError, NegotiationInput,
};
use crate::payload::{contains_mime_type, CPIM_CONTENT_TYPE};
use crate::transport::{parse_path, ConnectorFactory, Role, TransportKind};

/// State shared between the lifecycle and the message engine.
#[derive(Debug)]
pub struct StreamShared {
    events: EventBus,
    state: Mutex<StreamState>,
    failure_reason: Mutex<Option<String>>,
    shutting_down: AtomicBool,
    transport: TransportKind,
    credentials: Option<String>,
}

impl StreamShared {
    /// Create shared state posting to `events`.
    pub fn new(events: EventBus, transport: TransportKind, credentials: Option<String>) -> Self {
        Self {
            events,
            state: Mutex::new(StreamState::New),
            failure_reason: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            transport,
            credentials,
        }
    }

    /// Event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Post an event.
    pub fn post(&self, event: StreamEvent) {
        self.events.post(event);
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        let mut current = self.state.lock();
        tracing::debug!("Stream state {:?} -> {:?}", *current, state);
        *current = state;
    }

    /// First recorded failure.
    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.lock().clone()
    }

    /// Transport in effect.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Whether the owner announced the stream is going away.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Mark the stream as going away; a clean close while reading is then
    /// not a failure.
    pub fn deactivate(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Record a failure (the first one wins) and post did-fail.
    pub fn fail(&self, context: FailureContext, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Stream failed during {}: {}", context, reason);
        self.failure_reason.lock().get_or_insert_with(|| reason.clone());
        {
            let mut state = self.state.lock();
            if matches!(*state, StreamState::Initialized | StreamState::Starting | StreamState::Started) {
                *state = StreamState::Failed;
            }
        }
        self.post(StreamEvent::DidFail {
            context,
            reason,
            transport: self.transport,
            credentials: self.credentials.clone(),
        });
    }

    fn did_not_initialize(&self, reason: String) {
        self.post(StreamEvent::DidNotInitialize {
            reason,
            transport: self.transport,
            credentials: self.credentials.clone(),
        });
    }
}

/// Drives negotiation and teardown for one stream.
///
/// Every operation runs on a child of one cancellation token; `end` cancels
/// the parent and waits for all of them before tearing down, so no event
/// from an interrupted operation can follow the teardown events.
pub struct StreamCore {
    shared: Arc<StreamShared>,
    config: Arc<Config>,
    factory: Arc<dyn ConnectorFactory>,
    message_session: Arc<dyn MessageSession>,
    session: Mutex<Option<Arc<dyn SessionContext>>>,
    engine: tokio::sync::Mutex<Option<NegotiationEngine>>,
    cancel: CancellationToken,
    ops: Mutex<Vec<JoinHandle<()>>>,
    init_done: watch::Sender<bool>,
    done: AtomicBool,
    remote_role: Mutex<Option<Role>>,
    local_media: Mutex<Option<MediaDescription>>,
    remote_media: Mutex<Option<MediaDescription>>,
}

impl std::fmt::Debug for StreamCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCore")
            .field("state", &self.shared.state())
            .field("done", &self.done.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl StreamCore {
    /// Create a stream core.
    pub fn new(
        config: Arc<Config>,
        factory: Arc<dyn ConnectorFactory>,
        message_session: Arc<dyn MessageSession>,
        shared: Arc<StreamShared>,
    ) -> Arc<Self> {
        let (init_done, _) = watch::channel(false);
        Arc::new(Self {
            shared,
            config,
            factory,
            message_session,
            session: Mutex::new(None),
            engine: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
            ops: Mutex::new(Vec::new()),
            init_done,
            done: AtomicBool::new(false),
            remote_role: Mutex::new(None),
            local_media: Mutex::new(None),
            remote_media: Mutex::new(None),
        })
    }

    /// Shared state.
    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Local media, once initialized.
    pub fn local_media(&self) -> Option<MediaDescription> {
        self.local_media.lock().clone()
    }

    /// Remote media, once start was called.
    pub fn remote_media(&self) -> Option<MediaDescription> {
        self.remote_media.lock().clone()
    }

    /// Owning session, until the stream ends.
    pub fn session(&self) -> Option<Arc<dyn SessionContext>> {
        self.session.lock().clone()
    }

    /// Record the remote `setup` role from the incoming offer.
    pub fn set_remote_role(&self, role: Role) {
        *self.remote_role.lock() = Some(role);
    }

    /// Whether `end` was called.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Prepare the local endpoint. Posts did-initialize or
    /// did-not-initialize.
    pub fn initialize(self: &Arc<Self>, session: Arc<dyn SessionContext>, direction: Direction) -> Result<()> {
        if self.is_done() {
            return Err(ChatError::InvalidState("Stream has ended".to_string()));
        }
        {
            let mut state = self.shared.state.lock();
            if *state != StreamState::New {
                return Err(ChatError::InvalidState(format!("Cannot initialize stream in state {:?}", *state)));
            }
            *state = StreamState::Initializing;
        }
        *self.session.lock() = Some(Arc::clone(&session));

        let token = self.cancel.child_token();
        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => return,
                result = core.run_initialize(session.as_ref(), direction) => result,
            };
            core.init_done.send_replace(true);
            match result {
                Ok(media) => {
                    tracing::info!("Stream initialized ({} {})", direction, core.shared.transport());
                    *core.local_media.lock() = Some(media);
                    core.shared.set_state(StreamState::Initialized);
                    core.shared.post(StreamEvent::DidInitialize);
                },
                Err(err) => {
                    tracing::warn!("Stream did not initialize: {}", err);
                    core.shared.set_state(StreamState::FailedInit);
                    core.did_not_initialize(err.to_string());
                },
            }
        });
        self.ops.lock().push(handle);
        Ok(())
    }

    /// Complete the connection against the remote media. Waits for a
    /// still-running initialize first. Posts did-start or did-fail.
    pub fn start(self: &Arc<Self>, remote_media: MediaDescription) -> Result<()> {
        if self.is_done() {
            return Err(ChatError::InvalidState("Stream has ended".to_string()));
        }
        let state = self.state();
        if !matches!(state, StreamState::Initializing | StreamState::Initialized) {
            return Err(ChatError::InvalidState(format!("Cannot start stream in state {:?}", state)));
        }
        *self.remote_media.lock() = Some(remote_media.clone());

        let token = self.cancel.child_token();
        let core = Arc::clone(self);
        let mut init_done = self.init_done.subscribe();
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => return,
                result = async {
                    let _ = init_done.wait_for(|done| *done).await;
                    match core.state() {
                        // did-not-initialize was already posted
                        StreamState::FailedInit => return None,
                        StreamState::Initialized => {},
                        _ => return Some(Err((FailureContext::SdpNegotiation, NegotiationError::NotInitialized))),
                    }
                    core.shared.set_state(StreamState::Starting);
                    Some(core.run_start(&remote_media).await)
                } => result,
            };
            let Some(result) = result else {
                tracing::debug!("Skipping start of a stream that failed to initialize");
                return;
            };
            match result {
                Ok(()) => {
                    tracing::info!("Stream started");
                    core.shared.set_state(StreamState::Started);
                    core.shared.post(StreamEvent::DidStart);
                    core.message_session.started();
                },
                Err((context, err)) => core.shared.fail(context, err.to_string()),
            }
        });
        self.ops.lock().push(handle);
        Ok(())
    }

    /// Tear the stream down. Idempotent; the returned task finishes once
    /// every outstanding message has been resolved.
    pub fn end(self: &Arc<Self>) -> JoinHandle<()> {
        let first = !self.done.swap(true, Ordering::SeqCst);
        let core = Arc::clone(self);
        tokio::spawn(async move {
            if !first {
                return;
            }
            core.cancel.cancel();
            let ops = std::mem::take(&mut *core.ops.lock());
            for op in ops {
                if let Err(err) = op.await {
                    if err.is_panic() {
                        tracing::error!("Stream operation panicked: {}", err);
                    }
                }
            }

            let initialized = core.local_media.lock().is_some();
            if !initialized {
                if let Some(mut engine) = core.engine.lock().await.take() {
                    engine.cleanup();
                }
                match core.state() {
                    StreamState::Initializing => {
                        core.shared.set_state(StreamState::FailedInit);
                        core.did_not_initialize("Interrupted".to_string());
                    },
                    StreamState::New => {
                        // never initialized: only queued messages to resolve
                        core.shared.set_state(StreamState::Ended);
                        core.message_session.abandon("Stream ended");
                        core.message_session.ended();
                    },
                    // failed initialization was already reported
                    _ => {},
                }
                core.release();
                return;
            }

            core.shared.set_state(StreamState::Ending);
            core.shared.post(StreamEvent::WillEnd);
            core.message_session.shutdown().await;
            if let Some(mut engine) = core.engine.lock().await.take() {
                engine.cleanup();
            }
            core.shared.set_state(StreamState::Ended);
            core.shared.post(StreamEvent::DidEnd {
                error: core.shared.failure_reason(),
            });
            core.message_session.ended();
            core.release();
            tracing::info!("Stream ended");
        })
    }

    async fn run_initialize(
        &self,
        session: &dyn SessionContext,
        direction: Direction,
    ) -> std::result::Result<MediaDescription, NegotiationError> {
        let account = &self.config.account;
        let remote_role = *self.remote_role.lock();
        let plan = decide(NegotiationInput {
            account,
            has_certificate: self.config.tls.has_certificate(),
            direction,
            remote_role,
        })?;
        tracing::info!(
            "Using {} endpoint with local role {} for {} stream",
            plan.connector.name(),
            plan.local_role,
            direction
        );

        let mut slot = self.engine.lock().await;
        let engine = slot.insert(NegotiationEngine::new(
            Arc::clone(&self.factory),
            plan,
            account.transport,
            account.tls_credentials.clone(),
        ));
        let path = engine.prepare(&session.local_address()).await?;
        let chat = &self.config.chat;
        Ok(build_local_media(
            &path,
            "sendrecv",
            &chat.accept_types,
            &chat.accept_wrapped_types,
            engine.local_role(),
        ))
    }

    async fn run_start(
        &self,
        remote: &MediaDescription,
    ) -> std::result::Result<(), (FailureContext, NegotiationError)> {
        let at = |context: FailureContext| move |err: NegotiationError| (context, err);
        let negotiating = FailureContext::SdpNegotiation;

        let remote_accept_types = remote.list("accept-types");
        let remote_accept_wrapped_types = remote.list("accept-wrapped-types");
        let cpim_enabled = contains_mime_type(&self.config.chat.accept_types, CPIM_CONTENT_TYPE)
            && contains_mime_type(&remote_accept_types, CPIM_CONTENT_TYPE);

        let path = remote
            .first("path")
            .ok_or(NegotiationError::MissingPath)
            .map_err(at(negotiating))?;
        let remote_path = parse_path(path)
            .map_err(|e| NegotiationError::InvalidMedia(e.to_string()))
            .map_err(at(negotiating))?;

        let mut slot = self.engine.lock().await;
        let engine = slot
            .as_mut()
            .ok_or(NegotiationError::NotInitialized)
            .map_err(at(negotiating))?;
        engine.check_remote_path(&remote_path).map_err(at(negotiating))?;

        if !self.config.account.is_local_network() {
            let remote_setup = remote
                .first("setup")
                .and_then(|s| s.parse::<Role>().ok())
                .unwrap_or(Role::Passive);
            engine
                .apply_remote_setup(remote_setup)
                .await
                .map_err(at(negotiating))?;
        }

        let channel = engine
            .complete(remote_path)
            .await
            .map_err(at(FailureContext::Start))?;
        // the channel owns the connection from here on
        *slot = None;
        drop(slot);

        let session = self
            .session()
            .ok_or(NegotiationError::NotInitialized)
            .map_err(at(FailureContext::Start))?;
        self.message_session.attach(
            channel,
            Negotiated {
                remote_media: remote.clone(),
                remote_accept_types,
                remote_accept_wrapped_types,
                cpim_enabled,
            },
            session,
        );
        Ok(())
    }

    fn did_not_initialize(&self, reason: String) {
        self.shared.did_not_initialize(reason);
        self.message_session.abandon("Stream was closed");
        self.message_session.ended();
    }

    fn release(&self) {
        *self.session.lock() = None;
    }
}
