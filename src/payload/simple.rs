//! Bare content-typed payloads, sent when no CPIM envelope is needed.

use bytes::Bytes;

use super::mime::ContentType;

/// Content plus its Content-Type and optional charset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplePayload {
    /// Raw content
    pub content: Bytes,
    /// `type/subtype`
    pub content_type: String,
    /// Charset parameter, if any
    pub charset: Option<String>,
}

impl SimplePayload {
    /// Create a payload.
    pub fn new(content: impl Into<Bytes>, content_type: impl Into<String>, charset: Option<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
            charset,
        }
    }

    /// Encode into (content, Content-Type header value).
    pub fn encode(&self) -> (Bytes, String) {
        let header = match &self.charset {
            Some(charset) => format!("{}; charset=\"{}\"", self.content_type, charset),
            None => self.content_type.clone(),
        };
        (self.content.clone(), header)
    }

    /// Decode from content and the received Content-Type header value.
    pub fn decode(content: impl Into<Bytes>, content_type: &str) -> Self {
        let parsed = ContentType::parse(content_type);
        Self {
            content: content.into(),
            charset: parsed.charset(),
            content_type: parsed.mime_type,
        }
    }
}
