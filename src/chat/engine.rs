//! Outbound queue worker and delivery tracking.
//!
//! One [`ChatEngine`] per stream. Messages are queued from the start and
//! only flow once the lifecycle attaches a channel; from then on a single
//! worker submits them in order while a reader task dispatches whatever the
//! channel yields (see `inbound`).
//!
//! Every message queued with progress notification resolves exactly once:
//! a report or a failed response resolves it from the pending set, and
//! whatever is still pending or queued when the worker stops is resolved
//! with "Stream ended".

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::message::{MessageContent, QueuedMessage};
use crate::config::Config;
use crate::encryption::{EncryptionOverlay, OverlayError};
use crate::payload::{contains_mime_type, now, CpimPayload, SimplePayload};
use crate::stream::{FailureContext, MessageSession, Negotiated, SessionContext, StreamEvent, StreamShared};
use crate::transport::{ActiveChannel, ChunkChannel, OutgoingChunk, ReportRequest};

const STREAM_ENDED: &str = "Stream ended";

/// The established channel plus what was negotiated for it.
#[derive(Clone)]
pub(super) struct Link {
    pub channel: Arc<dyn ChunkChannel>,
    pub negotiated: Arc<Negotiated>,
    pub session: Arc<dyn SessionContext>,
}

impl Link {
    /// Chat room capabilities announced by a conference focus.
    pub fn chatroom_capabilities(&self) -> Vec<String> {
        if self.negotiated.cpim_enabled && self.session.remote_focus() {
            self.negotiated.remote_media.list("chatroom")
        } else {
            Vec::new()
        }
    }

    pub fn private_messages_allowed(&self) -> bool {
        self.chatroom_capabilities().iter().any(|c| c == "private-messages")
    }
}

/// Delivery bookkeeping, shared by the worker and the reader.
#[derive(Debug, Default)]
pub(super) struct DeliveryState {
    /// Sent with reports requested, outcome not yet known
    pub pending: HashSet<String>,
    /// Message id -> fragments received so far
    pub fragments: HashMap<String, Vec<Bytes>>,
    /// NICKNAME transactions awaiting a response
    pub nicknames: HashSet<String>,
}

/// Why an outbound message was not submitted.
enum Rejection {
    /// This message only
    Message(String),
    /// The secure channel is broken; the stream fails
    Stream(String),
}

/// Message queue and delivery engine for one stream.
pub(crate) struct ChatEngine {
    this: Weak<ChatEngine>,
    pub(super) shared: Arc<StreamShared>,
    pub(super) config: Arc<Config>,
    pub(super) overlay: Option<Arc<EncryptionOverlay>>,
    queue: mpsc::UnboundedSender<QueuedMessage>,
    backlog: Mutex<Option<mpsc::UnboundedReceiver<QueuedMessage>>>,
    pub(super) delivery: Mutex<DeliveryState>,
    link: RwLock<Option<Link>>,
    pub(super) cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatEngine {
    pub fn new(shared: Arc<StreamShared>, config: Arc<Config>, overlay: Option<Arc<EncryptionOverlay>>) -> Arc<Self> {
        let (queue, backlog) = mpsc::unbounded_channel();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            shared,
            config,
            overlay,
            queue,
            backlog: Mutex::new(Some(backlog)),
            delivery: Mutex::new(DeliveryState::default()),
            link: RwLock::new(None),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Queue a message. Once the queue is closed the message resolves
    /// immediately.
    pub fn enqueue(&self, message: QueuedMessage) {
        if let Err(mpsc::error::SendError(message)) = self.queue.send(message) {
            tracing::debug!("Queue closed, dropping message {}", message.id);
            if message.notify_progress {
                self.shared.post(StreamEvent::not_delivered(message.id, STREAM_ENDED));
            }
        }
    }

    pub(super) fn link(&self) -> Option<Link> {
        self.link.read().clone()
    }

    /// Send a NICKNAME request under `transaction_id`.
    pub fn send_nickname(self: &Arc<Self>, nickname: String, transaction_id: String) {
        let Some(link) = self.link() else {
            tracing::debug!("No channel yet, not sending nickname");
            return;
        };
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.delivery.lock().nicknames.insert(transaction_id.clone());
            let chunk = OutgoingChunk::nickname(transaction_id.clone(), &nickname);
            let result = tokio::select! {
                () = engine.cancel.cancelled() => return,
                result = link.channel.send_chunk(chunk) => result,
            };
            if let Err(err) = result {
                engine.delivery.lock().nicknames.remove(&transaction_id);
                engine.shared.fail(FailureContext::Sending, err.to_string());
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn run_queue(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<QueuedMessage>, link: Link) {
        loop {
            let queued = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                queued = queue.recv() => match queued {
                    Some(queued) => queued,
                    None => break,
                },
            };
            if !self.deliver(queued, &link).await {
                break;
            }
        }
        self.flush_pending();
        drain(&self.shared, &mut queue, STREAM_ENDED);
    }

    /// Submit one message. Returns false when interrupted by shutdown.
    async fn deliver(&self, queued: QueuedMessage, link: &Link) -> bool {
        let QueuedMessage {
            id, notify_progress, ..
        } = &queued;
        let (content, content_type) = match self.encode(&queued, link) {
            Ok(encoded) => encoded,
            Err(Rejection::Message(reason)) => {
                tracing::info!("Not sending message {}: {}", id, reason);
                if *notify_progress {
                    self.shared.post(StreamEvent::not_delivered(id.clone(), reason));
                }
                return true;
            },
            Err(Rejection::Stream(reason)) => {
                if *notify_progress {
                    self.shared.post(StreamEvent::not_delivered(id.clone(), reason.clone()));
                }
                self.shared.fail(FailureContext::Sending, reason);
                return true;
            },
        };

        let chunk = OutgoingChunk::message(id.clone(), content_type, content, ReportRequest::from(*notify_progress));
        if *notify_progress {
            self.delivery.lock().pending.insert(id.clone());
        }
        let result = tokio::select! {
            biased;
            // still pending: resolved by the flush
            () = self.cancel.cancelled() => return false,
            result = link.channel.send_chunk(chunk) => result,
        };
        match result {
            Ok(()) => {
                tracing::debug!("Sent message {}", id);
                if *notify_progress {
                    self.shared.post(StreamEvent::DidSendMessage { message_id: id.clone() });
                }
            },
            Err(err) => {
                tracing::warn!("Failed to send message {}: {}", id, err);
                if *notify_progress && self.delivery.lock().pending.remove(id) {
                    self.shared.post(StreamEvent::not_delivered(id.clone(), err.to_string()));
                }
            },
        }
        true
    }

    /// Run the overlay and pick the wire form: (content, Content-Type).
    fn encode(&self, queued: &QueuedMessage, link: &Link) -> Result<(Bytes, String), Rejection> {
        let message = &queued.message;
        let charset = match message.content {
            MessageContent::Text(_) => Some("utf-8".to_string()),
            MessageContent::Binary(_) => None,
        };
        let mut content = message.content.to_bytes();

        if !queued.internal {
            if let Some(overlay) = &self.overlay {
                content = overlay
                    .handle_output(content, &message.content_type)
                    .map_err(|err| match err {
                        OverlayError::Protocol(reason) => Rejection::Stream(reason),
                        other => Rejection::Message(other.to_string()),
                    })?;
            }
        }

        let negotiated = &link.negotiated;
        let local = link.session.local_identity();
        let remote = link.session.remote_identity();
        let sender = message.sender.clone().or_else(|| local.clone());
        let recipients = if message.recipients.is_empty() {
            remote.clone().into_iter().collect()
        } else {
            message.recipients.clone()
        };
        let default_recipients = recipients.len() == 1 && remote.as_ref() == recipients.first();

        let need_cpim = sender != local
            || !default_recipients
            || !message.courtesy_recipients.is_empty()
            || message.subject.is_some()
            || message.timestamp.is_some()
            || !message.required.is_empty()
            || !message.additional_headers.is_empty();
        let content_type = message.content_type.as_str();
        let wrapped_ok = contains_mime_type(&negotiated.remote_accept_wrapped_types, content_type);

        let use_cpim = if need_cpim || !contains_mime_type(&negotiated.remote_accept_types, content_type) {
            if !negotiated.cpim_enabled {
                return Err(Rejection::Message(if need_cpim {
                    "Additional message meta-data cannot be sent, because the CPIM wrapper is not used".to_string()
                } else {
                    format!("Unsupported content_type for outgoing message: {:?}", content_type)
                }));
            }
            if !wrapped_ok {
                return Err(Rejection::Message(format!(
                    "Unsupported content_type for outgoing message: {:?}",
                    content_type
                )));
            }
            if !default_recipients && !link.private_messages_allowed() {
                return Err(Rejection::Message("The remote end does not support private messages".to_string()));
            }
            true
        } else {
            self.config.chat.prefer_cpim && negotiated.cpim_enabled && wrapped_ok
        };

        if use_cpim {
            let payload = CpimPayload {
                content,
                content_type: message.content_type.clone(),
                charset,
                sender,
                recipients,
                courtesy_recipients: message.courtesy_recipients.clone(),
                subject: message.subject.clone(),
                timestamp: Some(message.timestamp.unwrap_or_else(now)),
                required: message.required.clone(),
                additional_headers: message.additional_headers.clone(),
            };
            let (content, content_type) = payload.encode();
            Ok((content, content_type.to_string()))
        } else {
            Ok(SimplePayload::new(content, message.content_type.clone(), charset).encode())
        }
    }

    /// Resolve everything still awaiting a report.
    fn flush_pending(&self) {
        let pending = std::mem::take(&mut self.delivery.lock().pending);
        for id in pending {
            self.shared.post(StreamEvent::not_delivered(id, STREAM_ENDED));
        }
    }
}

/// Close `queue` and resolve what is left in it.
fn drain(shared: &StreamShared, queue: &mut mpsc::UnboundedReceiver<QueuedMessage>, reason: &str) {
    queue.close();
    while let Ok(queued) = queue.try_recv() {
        if queued.notify_progress {
            shared.post(StreamEvent::not_delivered(queued.id, reason));
        }
    }
}

impl MessageSession for ChatEngine {
    fn attach(&self, channel: ActiveChannel, negotiated: Negotiated, session: Arc<dyn SessionContext>) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let ActiveChannel { channel, incoming } = channel;
        let link = Link {
            channel,
            negotiated: Arc::new(negotiated),
            session,
        };
        *self.link.write() = Some(link.clone());

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Arc::clone(&this).read_incoming(incoming, link.clone())));
        match self.backlog.lock().take() {
            Some(queue) => tasks.push(tokio::spawn(this.run_queue(queue, link))),
            None => tracing::warn!("Message queue already closed"),
        }
    }

    fn started(&self) {
        if let Some(overlay) = &self.overlay {
            if self.config.chat.auto_start_encryption {
                overlay.start();
            }
        }
    }

    fn shutdown(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.cancel.cancel();
            let tasks = std::mem::take(&mut *self.tasks.lock());
            for task in tasks {
                if let Err(err) = task.await {
                    if err.is_panic() {
                        tracing::error!("Chat engine task panicked: {}", err);
                    }
                }
            }
            self.flush_pending();
            if let Some(mut queue) = self.backlog.lock().take() {
                drain(&self.shared, &mut queue, STREAM_ENDED);
            }
            self.delivery.lock().fragments.clear();

            let Some(link) = self.link.write().take() else {
                return false;
            };
            if self.shared.failure_reason().is_some() {
                link.channel.lose_connection();
            } else {
                link.channel.shutdown().await;
            }
            true
        })
    }

    fn abandon(&self, reason: &str) {
        if let Some(mut queue) = self.backlog.lock().take() {
            drain(&self.shared, &mut queue, reason);
        }
    }

    fn ended(&self) {
        if let Some(overlay) = &self.overlay {
            overlay.detach();
        }
    }
}
