//! Chat messages as seen by the application.

use bytes::Bytes;

use crate::payload::{ChatIdentity, CpimHeader, MultilingualText, Timestamp};

/// Message body: decoded text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Text (already decoded from its charset)
    Text(String),
    /// Anything else
    Binary(Bytes),
}

impl MessageContent {
    /// Text content, if textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Binary(_) => None,
        }
    }

    /// Whether this is text.
    pub fn is_text(&self) -> bool {
        matches!(self, MessageContent::Text(_))
    }

    /// Raw bytes (UTF-8 for text).
    pub fn to_bytes(&self) -> Bytes {
        match self {
            MessageContent::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            MessageContent::Binary(bytes) => bytes.clone(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<Bytes> for MessageContent {
    fn from(b: Bytes) -> Self {
        MessageContent::Binary(b)
    }
}

impl From<Vec<u8>> for MessageContent {
    fn from(b: Vec<u8>) -> Self {
        MessageContent::Binary(Bytes::from(b))
    }
}

/// A chat message with its metadata.
///
/// Outbound, unset sender and recipients default to the session's local and
/// remote identities; setting anything else forces the CPIM envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Body
    pub content: MessageContent,
    /// Content-Type of the body
    pub content_type: String,
    /// Sender
    pub sender: Option<ChatIdentity>,
    /// Recipients
    pub recipients: Vec<ChatIdentity>,
    /// Courtesy recipients
    pub courtesy_recipients: Vec<ChatIdentity>,
    /// Subject
    pub subject: Option<MultilingualText>,
    /// Timestamp
    pub timestamp: Option<Timestamp>,
    /// Required extensions
    pub required: Vec<String>,
    /// Extra CPIM headers
    pub additional_headers: Vec<CpimHeader>,
}

impl ChatMessage {
    /// Message with no metadata.
    pub fn new(content: impl Into<MessageContent>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
            sender: None,
            recipients: Vec::new(),
            courtesy_recipients: Vec::new(),
            subject: None,
            timestamp: None,
            required: Vec::new(),
            additional_headers: Vec::new(),
        }
    }

    /// `text/plain` message.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(content.into(), "text/plain")
    }

    /// Set recipients.
    pub fn with_recipients(mut self, recipients: Vec<ChatIdentity>) -> Self {
        self.recipients = recipients;
        self
    }

    /// Set courtesy recipients.
    pub fn with_courtesy_recipients(mut self, recipients: Vec<ChatIdentity>) -> Self {
        self.courtesy_recipients = recipients;
        self
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: impl Into<MultilingualText>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set required extensions.
    pub fn with_required(mut self, required: Vec<String>) -> Self {
        self.required = required;
        self
    }

    /// Add an extra header.
    pub fn with_header(mut self, header: CpimHeader) -> Self {
        self.additional_headers.push(header);
        self
    }
}

/// Message id for a new outbound message.
pub(crate) fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A queued outbound unit.
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub id: String,
    pub message: ChatMessage,
    pub notify_progress: bool,
    /// Secure-channel protocol data; skips the overlay transform
    pub internal: bool,
}

impl QueuedMessage {
    pub fn new(message: ChatMessage, notify_progress: bool) -> Self {
        Self {
            id: new_message_id(),
            message,
            notify_progress,
            internal: false,
        }
    }

    pub fn internal(data: Bytes) -> Self {
        let content = match String::from_utf8(data.to_vec()) {
            Ok(text) => MessageContent::Text(text),
            Err(_) => MessageContent::Binary(data),
        };
        Self {
            id: new_message_id(),
            message: ChatMessage::new(content, "text/plain"),
            notify_progress: false,
            internal: true,
        }
    }
}
