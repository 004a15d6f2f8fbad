//! Inbound chunk dispatch.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::engine::{ChatEngine, Link};
use super::message::{ChatMessage, MessageContent};
use crate::encryption::OverlayError;
use crate::payload::{
    contains_mime_type, decode_charset, now, CpimPayload, IsComposingDocument, SimplePayload, COMPOSING_CONTENT_TYPE,
    CPIM_CONTENT_TYPE,
};
use crate::stream::{FailureContext, StreamEvent};
use crate::transport::{ContinuationFlag, Incoming, IncomingChunk, Method, TransactionResponse, TransportError};

fn acknowledge(link: &Link, chunk: &IncomingChunk, code: u16, comment: &str) {
    if let Err(err) = link.channel.send_report(chunk, code, comment) {
        tracing::warn!("Failed to answer chunk of {}: {}", chunk.message_id, err);
    }
}

impl ChatEngine {
    pub(super) async fn read_incoming(
        self: Arc<Self>,
        mut incoming: BoxStream<'static, Result<Incoming, TransportError>>,
        link: Link,
    ) {
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                item = incoming.next() => item,
            };
            match item {
                Some(Ok(Incoming::Request(chunk))) => self.handle_request(chunk, &link),
                Some(Ok(Incoming::Response(response))) => self.handle_response(response),
                Some(Err(err)) => return self.read_failed(err),
                None => return self.read_failed(TransportError::ConnectionDone),
            }
        }
    }

    fn read_failed(&self, err: TransportError) {
        if self.shared.is_shutting_down() && err.is_connection_done() {
            tracing::debug!("Channel closed while shutting down");
            return;
        }
        self.shared.fail(FailureContext::Reading, err.to_string());
    }

    fn handle_request(&self, chunk: IncomingChunk, link: &Link) {
        match chunk.method {
            Method::Send => self.handle_send(&chunk, link),
            Method::Report => self.handle_report(&chunk),
            ref method => tracing::debug!("Ignoring {} request", method),
        }
    }

    /// Delivery report for a message we sent.
    fn handle_report(&self, chunk: &IncomingChunk) {
        let Some(status) = &chunk.status else {
            tracing::debug!("REPORT for {} without status", chunk.message_id);
            return;
        };
        if !self.delivery.lock().pending.remove(&chunk.message_id) {
            tracing::debug!("Dropping REPORT for unknown message {}", chunk.message_id);
            return;
        }
        let message_id = chunk.message_id.clone();
        let (code, reason) = (status.code, status.comment.clone());
        self.shared.post(if status.is_success() {
            StreamEvent::DidDeliverMessage {
                message_id,
                code,
                reason,
            }
        } else {
            StreamEvent::DidNotDeliverMessage {
                message_id,
                code,
                reason,
            }
        });
    }

    /// Response to a SEND or NICKNAME transaction.
    fn handle_response(&self, response: TransactionResponse) {
        let TransactionResponse {
            transaction_id,
            status,
        } = response;
        let mut delivery = self.delivery.lock();
        if delivery.nicknames.remove(&transaction_id) {
            drop(delivery);
            self.shared.post(if status.is_success() {
                StreamEvent::DidSetNickname {
                    message_id: transaction_id,
                }
            } else {
                StreamEvent::DidNotSetNickname {
                    message_id: transaction_id,
                    code: status.code,
                    reason: status.comment,
                }
            });
        } else if !status.is_success() && delivery.pending.remove(&transaction_id) {
            drop(delivery);
            self.shared.post(StreamEvent::DidNotDeliverMessage {
                message_id: transaction_id,
                code: status.code,
                reason: status.comment,
            });
        }
    }

    fn handle_send(&self, chunk: &IncomingChunk, link: &Link) {
        if chunk.is_keepalive() {
            acknowledge(link, chunk, 200, "OK");
            return;
        }
        let header = chunk.content_type.as_deref().unwrap_or_default();
        let content_type = header.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        if !contains_mime_type(&self.config.chat.accept_types, &content_type) {
            acknowledge(link, chunk, 413, "Unwanted Message");
            return;
        }

        let data = match chunk.cont_flag {
            ContinuationFlag::Abort => {
                self.delivery.lock().fragments.remove(&chunk.message_id);
                acknowledge(link, chunk, 200, "OK");
                return;
            },
            ContinuationFlag::More => {
                self.delivery
                    .lock()
                    .fragments
                    .entry(chunk.message_id.clone())
                    .or_default()
                    .push(chunk.data.clone());
                acknowledge(link, chunk, 200, "OK");
                return;
            },
            ContinuationFlag::Final => {
                let buffered = self.delivery.lock().fragments.remove(&chunk.message_id);
                match buffered {
                    Some(mut parts) => {
                        parts.push(chunk.data.clone());
                        Bytes::from(parts.concat())
                    },
                    None => chunk.data.clone(),
                }
            },
        };

        let remote = link.session.remote_identity();
        let (mut message, charset, private) = if content_type == CPIM_CONTENT_TYPE {
            let payload = match CpimPayload::decode(&data) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::debug!("Rejecting CPIM message {}: {}", chunk.message_id, err);
                    acknowledge(link, chunk, 400, "CPIM Parser Error");
                    return;
                },
            };
            if !contains_mime_type(&self.config.chat.accept_wrapped_types, &payload.content_type) {
                acknowledge(link, chunk, 413, "Unwanted Message");
                return;
            }
            let private = link.session.remote_focus()
                && payload.recipients.len() == 1
                && payload.recipients.first() != remote.as_ref();
            let message = ChatMessage {
                content: MessageContent::Binary(payload.content),
                content_type: payload.content_type,
                sender: payload.sender.or(remote),
                recipients: payload.recipients,
                courtesy_recipients: payload.courtesy_recipients,
                subject: payload.subject,
                timestamp: Some(payload.timestamp.unwrap_or_else(now)),
                required: payload.required,
                additional_headers: payload.additional_headers,
            };
            (message, payload.charset, private)
        } else {
            let payload = SimplePayload::decode(data, header);
            let mut message = ChatMessage::new(payload.content, payload.content_type);
            message.sender = remote;
            message.recipients = link.session.local_identity().into_iter().collect();
            message.timestamp = Some(now());
            (message, payload.charset, false)
        };

        let raw = message.content.to_bytes();
        let (raw, encrypted, encryption_active) = match &self.overlay {
            None => (raw, false, false),
            Some(overlay) => match overlay.handle_input(raw.clone(), &message.content_type) {
                Ok(plain) => {
                    let active = overlay.active();
                    (plain, active, active)
                },
                Err(OverlayError::Ignore) => {
                    acknowledge(link, chunk, 200, "OK");
                    return;
                },
                Err(OverlayError::Unencrypted) => (raw, false, true),
                Err(OverlayError::EncryptedMessage(error)) => {
                    acknowledge(link, chunk, 400, &error);
                    self.shared.post(StreamEvent::EncryptionError { error });
                    return;
                },
                Err(OverlayError::Protocol(error)) => {
                    acknowledge(link, chunk, 200, "OK");
                    self.shared.post(StreamEvent::EncryptionError { error });
                    return;
                },
            },
        };

        message.content = match &charset {
            Some(charset) => MessageContent::Text(decode_charset(&raw, charset)),
            None if message.content_type.starts_with("text/") => {
                MessageContent::Text(String::from_utf8_lossy(&raw).into_owned())
            },
            None => MessageContent::Binary(raw),
        };

        if message.content_type.eq_ignore_ascii_case(COMPOSING_CONTENT_TYPE) {
            let document = match IsComposingDocument::parse(&String::from_utf8_lossy(&message.content.to_bytes())) {
                Ok(document) => document,
                Err(err) => {
                    acknowledge(link, chunk, 400, &err.to_string());
                    return;
                },
            };
            acknowledge(link, chunk, 200, "OK");
            self.shared.post(StreamEvent::GotComposingIndication {
                state: document.state,
                refresh: document.refresh_or_default(),
                content_type: document.content_type,
                last_active: document.last_active,
                sender: message.sender,
                recipients: message.recipients,
                private,
                encrypted,
                encryption_active,
            });
        } else {
            acknowledge(link, chunk, 200, "OK");
            tracing::debug!("Received {} message {}", message.content_type, chunk.message_id);
            self.shared.post(StreamEvent::GotMessage {
                message,
                private,
                encrypted,
                encryption_active,
            });
        }
    }
}
