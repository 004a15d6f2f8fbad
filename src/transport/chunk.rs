//! Decoded MSRP chunks exchanged with the transport collaborator.
//!
//! The collaborator owns framing; this module only models what crosses the
//! boundary: requests arriving from the peer, transaction responses to our
//! own requests, and the outgoing requests we hand over.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// Request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Message content
    Send,
    /// Delivery report
    Report,
    /// Chat room nickname request
    Nickname,
    /// Anything else
    Other(String),
}

impl Method {
    /// Parse a method token.
    pub fn parse(value: &str) -> Self {
        match value {
            "SEND" => Method::Send,
            "REPORT" => Method::Report,
            "NICKNAME" => Method::Nickname,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Send => f.write_str("SEND"),
            Method::Report => f.write_str("REPORT"),
            Method::Nickname => f.write_str("NICKNAME"),
            Method::Other(m) => f.write_str(m),
        }
    }
}

/// Continuation flag closing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContinuationFlag {
    /// `$`: last chunk of the message
    #[default]
    Final,
    /// `+`: more chunks follow
    More,
    /// `#`: message aborted
    Abort,
}

impl ContinuationFlag {
    /// Wire character.
    pub fn as_char(self) -> char {
        match self {
            ContinuationFlag::Final => '$',
            ContinuationFlag::More => '+',
            ContinuationFlag::Abort => '#',
        }
    }

    /// Parse a wire character.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '$' => Some(ContinuationFlag::Final),
            '+' => Some(ContinuationFlag::More),
            '#' => Some(ContinuationFlag::Abort),
            _ => None,
        }
    }
}

/// `Success-Report` / `Failure-Report` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportRequest {
    /// Reports wanted
    Yes,
    /// No reports
    No,
}

impl ReportRequest {
    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            ReportRequest::Yes => "yes",
            ReportRequest::No => "no",
        }
    }
}

impl From<bool> for ReportRequest {
    fn from(value: bool) -> Self {
        if value {
            ReportRequest::Yes
        } else {
            ReportRequest::No
        }
    }
}

/// Request status line of a REPORT, or a transaction response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Status code (200 = OK)
    pub code: u16,
    /// Reason phrase
    pub comment: String,
}

impl Status {
    /// Create a status.
    pub fn new(code: u16, comment: impl Into<String>) -> Self {
        Self {
            code,
            comment: comment.into(),
        }
    }

    /// `200 OK`.
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// A request received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingChunk {
    /// Method
    pub method: Method,
    /// Transaction id
    pub transaction_id: String,
    /// `Message-ID`
    pub message_id: String,
    /// `Content-Type`, when a body is present
    pub content_type: Option<String>,
    /// Body fragment
    pub data: Bytes,
    /// Continuation flag
    pub cont_flag: ContinuationFlag,
    /// Total message size announced by `Byte-Range` (0 for keep-alives)
    pub size: u64,
    /// `Status` of REPORT requests
    pub status: Option<Status>,
    /// Remaining headers
    pub headers: BTreeMap<String, String>,
}

impl IncomingChunk {
    /// A final SEND chunk carrying `data`.
    pub fn send(message_id: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let message_id = message_id.into();
        Self {
            method: Method::Send,
            transaction_id: message_id.clone(),
            message_id,
            content_type: Some(content_type.into()),
            size: data.len() as u64,
            data,
            cont_flag: ContinuationFlag::Final,
            status: None,
            headers: BTreeMap::new(),
        }
    }

    /// A REPORT for `message_id`.
    pub fn report(message_id: impl Into<String>, status: Status) -> Self {
        let message_id = message_id.into();
        Self {
            method: Method::Report,
            transaction_id: message_id.clone(),
            message_id,
            content_type: None,
            data: Bytes::new(),
            cont_flag: ContinuationFlag::Final,
            size: 0,
            status: Some(status),
            headers: BTreeMap::new(),
        }
    }

    /// Set the continuation flag.
    pub fn with_flag(mut self, flag: ContinuationFlag) -> Self {
        self.cont_flag = flag;
        self
    }

    /// Keep-alive SENDs carry no content.
    pub fn is_keepalive(&self) -> bool {
        self.size == 0
    }
}

/// Response to a request we sent, correlated by transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResponse {
    /// Transaction id of the request
    pub transaction_id: String,
    /// Response status
    pub status: Status,
}

/// Anything the active channel yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A request from the peer
    Request(IncomingChunk),
    /// A response to one of our requests
    Response(TransactionResponse),
}

/// A request for the transport to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingChunk {
    /// Method
    pub method: Method,
    /// Transaction id; responses come back under this id
    pub transaction_id: String,
    /// `Message-ID` (empty for NICKNAME)
    pub message_id: String,
    /// `Content-Type`
    pub content_type: Option<String>,
    /// Body
    pub data: Bytes,
    /// `Success-Report`
    pub success_report: Option<ReportRequest>,
    /// `Failure-Report`
    pub failure_report: Option<ReportRequest>,
    /// Extra headers (`Use-Nickname`, ...)
    pub headers: BTreeMap<String, String>,
}

impl OutgoingChunk {
    /// A complete SEND with both report headers set to `report`.
    pub fn message(message_id: impl Into<String>, content_type: impl Into<String>, data: Bytes, report: ReportRequest) -> Self {
        let message_id = message_id.into();
        Self {
            method: Method::Send,
            transaction_id: message_id.clone(),
            message_id,
            content_type: Some(content_type.into()),
            data,
            success_report: Some(report),
            failure_report: Some(report),
            headers: BTreeMap::new(),
        }
    }

    /// A NICKNAME request.
    pub fn nickname(transaction_id: impl Into<String>, nickname: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Use-Nickname".to_string(), format!("\"{}\"", nickname));
        Self {
            method: Method::Nickname,
            transaction_id: transaction_id.into(),
            message_id: String::new(),
            content_type: None,
            data: Bytes::new(),
            success_report: None,
            failure_report: None,
            headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_flags() {
        for flag in [ContinuationFlag::Final, ContinuationFlag::More, ContinuationFlag::Abort] {
            assert_eq!(ContinuationFlag::from_char(flag.as_char()), Some(flag));
        }
        assert_eq!(ContinuationFlag::from_char('x'), None);
    }

    #[test]
    fn test_outgoing_message_headers() {
        let chunk = OutgoingChunk::message("m1", "text/plain", Bytes::from_static(b"hi"), ReportRequest::No);
        assert_eq!(chunk.method, Method::Send);
        assert_eq!(chunk.success_report, Some(ReportRequest::No));
        assert_eq!(chunk.failure_report.map(ReportRequest::as_str), Some("no"));

        let nick = OutgoingChunk::nickname("t1", "neo");
        assert_eq!(nick.method.to_string(), "NICKNAME");
        assert_eq!(nick.headers.get("Use-Nickname").map(String::as_str), Some("\"neo\""));
    }

    #[test]
    fn test_keepalive_detection() {
        let keepalive = IncomingChunk::send("k", "text/plain", Bytes::new());
        assert!(keepalive.is_keepalive());
        assert!(!IncomingChunk::send("m", "text/plain", "x").is_keepalive());
    }
}
