//! CPIM message envelope (`message/cpim`).
//!
//! # Wire Format
//!
//! ```text
//! From: Alice <sip:alice@example.com>
//! To: Bob <sip:bob@example.com>
//! Subject: Hello
//! Subject:;lang=fr Bonjour
//! DateTime: 2024-03-01T10:15:30+00:00
//! NS: ext <urn:example:ext>
//! ext.Priority: high
//!
//! Content-Type: text/plain; charset="utf-8"
//!
//! Hello Bob
//! ```
//!
//! The header block ends at the first `\r\n\r\n`. Header names are matched
//! against the namespace prefixes declared so far; a prefix is only known
//! after its `NS` line, so a header using a prefix declared further down is
//! dropped.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use super::identity::ChatIdentity;
use super::mime::ContentType;
use super::text::{format_timestamp, parse_timestamp, MultilingualText, Timestamp};

/// Content-Type of the CPIM envelope.
pub const CPIM_CONTENT_TYPE: &str = "message/cpim";

/// Namespace of the standard CPIM headers (registered under the empty prefix).
pub const STANDARD_NAMESPACE: &str = "urn:ietf:params:cpim-headers:";

/// Disposition notifications wrap their real content one level deeper.
const IMDN_CONTENT_TYPE: &str = "message/imdn+xml";

lazy_static! {
    static ref HEADER_RE: Regex = Regex::new(r"^(?:([^:]+?)\.)?(.+?): ?(.*)$").expect("header pattern is valid");
    static ref SUBJECT_RE: Regex =
        Regex::new(r"^(?:;lang=([a-z]{1,8}(?:-[a-z0-9]{1,8})*) )?(.*)$").expect("subject pattern is valid");
    static ref MIME_HEADER_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9-]*:").expect("MIME header pattern is valid");
    static ref NAMESPACE_RE: Regex = Regex::new(r"^(?:(\S+) ?)?<(.*)>$").expect("namespace pattern is valid");
}

/// CPIM decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CpimParseError {
    /// No blank line between headers and body.
    #[error("Invalid CPIM message: missing header terminator")]
    MissingSeparator,

    /// The encapsulated part carries no Content-Type.
    #[error("CPIM message missing Content-Type MIME header")]
    MissingContentType,
}

/// A header namespace: URI plus the prefix it was declared under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CpimNamespace {
    /// Namespace URI
    pub uri: String,
    /// Prefix (empty for the default namespace)
    pub prefix: String,
}

impl CpimNamespace {
    /// Create a namespace.
    pub fn new(uri: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            prefix: prefix.into(),
        }
    }

    /// The standard CPIM header namespace.
    pub fn standard() -> Self {
        Self::new(STANDARD_NAMESPACE, "")
    }
}

/// A header not interpreted by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpimHeader {
    /// Header name without prefix
    pub name: String,
    /// Namespace the header belongs to
    pub namespace: CpimNamespace,
    /// Header value (unescaped)
    pub value: String,
}

impl CpimHeader {
    /// Create a header.
    pub fn new(name: impl Into<String>, namespace: CpimNamespace, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            value: value.into(),
        }
    }
}

/// A decoded or to-be-encoded CPIM envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct CpimPayload {
    /// Wrapped content
    pub content: Bytes,
    /// Content-Type of the wrapped content
    pub content_type: String,
    /// Charset of the wrapped content
    pub charset: Option<String>,
    /// `From`
    pub sender: Option<ChatIdentity>,
    /// `To` (ordered)
    pub recipients: Vec<ChatIdentity>,
    /// `cc`
    pub courtesy_recipients: Vec<ChatIdentity>,
    /// `Subject`, all languages
    pub subject: Option<MultilingualText>,
    /// `DateTime`
    pub timestamp: Option<Timestamp>,
    /// `Required`
    pub required: Vec<String>,
    /// Every other header, in order
    pub additional_headers: Vec<CpimHeader>,
}

impl CpimPayload {
    /// Envelope around `content` with no metadata.
    pub fn new(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
            charset: None,
            sender: None,
            recipients: Vec::new(),
            courtesy_recipients: Vec::new(),
            subject: None,
            timestamp: None,
            required: Vec::new(),
            additional_headers: Vec::new(),
        }
    }

    /// Encode into (bytes, Content-Type).
    pub fn encode(&self) -> (Bytes, &'static str) {
        let mut namespaces: HashMap<String, String> = HashMap::new();
        namespaces.insert(String::new(), STANDARD_NAMESPACE.to_string());

        let mut lines: Vec<String> = Vec::new();

        if let Some(sender) = &self.sender {
            lines.push(format!("From: {}", escape_header_value(&sender.to_string())));
        }
        for recipient in &self.recipients {
            lines.push(format!("To: {}", escape_header_value(&recipient.to_string())));
        }
        for recipient in &self.courtesy_recipients {
            lines.push(format!("cc: {}", escape_header_value(&recipient.to_string())));
        }
        if let Some(subject) = &self.subject {
            if let Some(default) = &subject.default {
                let mut value = escape_header_value(default);
                // a leading `;` would read back as a language tag
                if value.starts_with(';') {
                    value.replace_range(..1, "\\u003b");
                }
                lines.push(format!("Subject: {}", value));
            }
            for (lang, text) in &subject.translations {
                lines.push(format!("Subject:;lang={} {}", lang, escape_header_value(text)));
            }
        }
        if let Some(timestamp) = &self.timestamp {
            lines.push(format!("DateTime: {}", format_timestamp(timestamp)));
        }
        if !self.required.is_empty() {
            lines.push(format!("Required: {}", self.required.join(",")));
        }

        for header in &self.additional_headers {
            let prefix = &header.namespace.prefix;
            if namespaces.get(prefix) != Some(&header.namespace.uri) {
                if prefix.is_empty() {
                    lines.push(format!("NS: <{}>", header.namespace.uri));
                } else {
                    lines.push(format!("NS: {} <{}>", prefix, header.namespace.uri));
                }
                namespaces.insert(prefix.clone(), header.namespace.uri.clone());
            }
            let value = escape_header_value(&header.value);
            if prefix.is_empty() {
                lines.push(format!("{}: {}", header.name, value));
            } else {
                lines.push(format!("{}.{}: {}", prefix, header.name, value));
            }
        }

        let mut out = lines.join("\r\n");
        out.push_str("\r\n\r\n");
        match &self.charset {
            Some(charset) => {
                let _ = write!(out, "Content-Type: {}; charset=\"{}\"", self.content_type, charset);
            },
            None => {
                let _ = write!(out, "Content-Type: {}", self.content_type);
            },
        }
        out.push_str("\r\n\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.content);
        (Bytes::from(bytes), CPIM_CONTENT_TYPE)
    }

    /// Decode an envelope.
    ///
    /// Headers that fail their own grammar (bad identity, bad timestamp) are
    /// skipped; only a missing header terminator or body Content-Type fails
    /// the whole message.
    pub fn decode(message: &[u8]) -> Result<Self, CpimParseError> {
        let separator = find(message, b"\r\n\r\n").ok_or(CpimParseError::MissingSeparator)?;
        let headers = String::from_utf8_lossy(&message[..separator]);
        let body = &message[separator + 4..];

        let mut namespaces: HashMap<String, CpimNamespace> = HashMap::new();
        namespaces.insert(String::new(), CpimNamespace::standard());

        let mut payload = Self::new(Bytes::new(), "");
        let mut subjects: BTreeMap<Option<String>, String> = BTreeMap::new();

        for line in headers.split("\r\n") {
            let Some(caps) = HEADER_RE.captures(line) else {
                continue;
            };
            let prefix = caps.get(1).map_or("", |m| m.as_str());
            let name = &caps[2];
            let raw_value = &caps[3];
            let value = unescape_header_value(raw_value);

            let Some(namespace) = namespaces.get(prefix).cloned() else {
                tracing::trace!("Dropping CPIM header with undeclared prefix {:?}", prefix);
                continue;
            };
            if name.contains('.') {
                continue;
            }

            // declarations stay readable after the default namespace is rebound
            if prefix.is_empty() && name == "NS" {
                if let Some(caps) = NAMESPACE_RE.captures(&value) {
                    let prefix = caps.get(1).map_or("", |m| m.as_str()).to_string();
                    let uri = caps[2].to_string();
                    namespaces.insert(prefix.clone(), CpimNamespace::new(uri, prefix));
                }
                continue;
            }

            if namespace.uri != STANDARD_NAMESPACE {
                payload.additional_headers.push(CpimHeader::new(name, namespace, value));
                continue;
            }

            match name {
                "From" => {
                    if let Ok(identity) = ChatIdentity::parse(&value) {
                        payload.sender = Some(identity);
                    }
                },
                "To" => {
                    if let Ok(identity) = ChatIdentity::parse(&value) {
                        payload.recipients.push(identity);
                    }
                },
                "cc" => {
                    if let Ok(identity) = ChatIdentity::parse(&value) {
                        payload.courtesy_recipients.push(identity);
                    }
                },
                "Subject" => {
                    // the language tag is read before unescaping
                    if let Some(caps) = SUBJECT_RE.captures(raw_value) {
                        let lang = caps.get(1).map(|m| m.as_str().to_string());
                        subjects.insert(lang, unescape_header_value(&caps[2]));
                    }
                },
                "DateTime" => {
                    if let Some(timestamp) = parse_timestamp(&value) {
                        payload.timestamp = Some(timestamp);
                    }
                },
                "Required" => {
                    payload
                        .required
                        .extend(value.split(',').map(|s| s.trim().to_string()));
                },
                _ => payload.additional_headers.push(CpimHeader::new(name, namespace, value)),
            }
        }

        if !subjects.is_empty() {
            let default = subjects.remove(&None);
            let translations = subjects
                .into_iter()
                .filter_map(|(lang, text)| lang.map(|lang| (lang, text)))
                .collect();
            payload.subject = Some(MultilingualText { default, translations });
        }

        let (mime_headers, content) = split_part(body).unwrap_or((body, &[][..]));
        let content_type = find_content_type(mime_headers).ok_or(CpimParseError::MissingContentType)?;
        let content_type = ContentType::parse(&content_type);

        // a notification body may itself be a MIME part; keep only its payload
        let content = match split_part(content) {
            Some((inner_headers, inner_content))
                if content_type.mime_type == IMDN_CONTENT_TYPE && is_mime_header_block(inner_headers) =>
            {
                inner_content
            },
            _ => content,
        };

        payload.content = Bytes::copy_from_slice(content);
        payload.charset = content_type.charset();
        payload.content_type = content_type.mime_type;
        Ok(payload)
    }
}

/// Escape control characters and backslashes in a header value.
pub fn escape_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 32 || c as u32 == 127 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            },
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape_header_value`]; unknown escapes are kept literally.
pub fn unescape_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().filter(|_| hex.len() == 4).and_then(char::from_u32) {
                    Some(decoded) => {
                        out.push(decoded);
                        for _ in 0..4 {
                            chars.next();
                        }
                    },
                    None => out.push_str("\\u"),
                }
            },
            Some(other) => {
                out.push('\\');
                out.push(other);
            },
            None => out.push('\\'),
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a MIME part at its first blank line (CRLF or bare LF).
fn split_part(part: &[u8]) -> Option<(&[u8], &[u8])> {
    let crlf = find(part, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(part, b"\n\n").map(|i| (i, 2));
    let boundary = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    boundary.map(|(index, len)| (&part[..index], &part[index + len..]))
}

/// True when every line of `block` is a `Name: value` header.
fn is_mime_header_block(block: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(block) else {
        return false;
    };
    !text.is_empty() && text.lines().all(|line| MIME_HEADER_RE.is_match(line))
}

fn find_content_type(headers: &[u8]) -> Option<String> {
    String::from_utf8_lossy(headers).lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ChatIdentity {
        ChatIdentity::parse("Alice <sip:alice@example.com>").unwrap()
    }

    fn bob() -> ChatIdentity {
        ChatIdentity::parse("Bob <sip:bob@example.com>").unwrap()
    }

    #[test]
    fn test_encode_header_order() {
        let mut payload = CpimPayload::new("Hello Bob", "text/plain");
        payload.charset = Some("utf-8".to_string());
        payload.sender = Some(alice());
        payload.recipients = vec![bob()];
        payload.subject = Some(MultilingualText::new("Hello").with_translation("fr", "Bonjour"));
        payload.timestamp = parse_timestamp("2024-03-01T10:15:30+00:00");
        payload.required = vec!["ext.Priority".to_string(), "urgent".to_string()];

        let (bytes, content_type) = payload.encode();
        assert_eq!(content_type, CPIM_CONTENT_TYPE);
        let expected = "From: Alice <sip:alice@example.com>\r\n\
                        To: Bob <sip:bob@example.com>\r\n\
                        Subject: Hello\r\n\
                        Subject:;lang=fr Bonjour\r\n\
                        DateTime: 2024-03-01T10:15:30+00:00\r\n\
                        Required: ext.Priority,urgent\r\n\
                        \r\n\
                        Content-Type: text/plain; charset=\"utf-8\"\r\n\
                        \r\n\
                        Hello Bob";
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), expected);
    }

    #[test]
    fn test_encode_declares_namespace_once() {
        let ns = CpimNamespace::new("urn:example:ext", "ext");
        let mut payload = CpimPayload::new("x", "text/plain");
        payload.additional_headers = vec![
            CpimHeader::new("Priority", ns.clone(), "high"),
            CpimHeader::new("Thread", ns, "42"),
            CpimHeader::new("Other", CpimNamespace::new("urn:example:other", "ext"), "1"),
        ];
        let (bytes, _) = payload.encode();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.matches("NS: ext <urn:example:ext>").count(), 1);
        assert!(text.contains("ext.Priority: high\r\next.Thread: 42\r\nNS: ext <urn:example:other>\r\next.Other: 1"));
    }

    #[test]
    fn test_decode_full_envelope() {
        let raw = "From: Alice <sip:alice@example.com>\r\n\
                   To: <sip:bob@example.com>\r\n\
                   cc: Carol <sip:carol@example.com>\r\n\
                   Subject:;lang=de Hallo\r\n\
                   DateTime: 2024-03-01T10:15:30.500Z\r\n\
                   Required: a, b\r\n\
                   NS: ext <urn:example:ext>\r\n\
                   ext.Priority: high\r\n\
                   X-Custom: yes\r\n\
                   \r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   Hi";
        let payload = CpimPayload::decode(raw.as_bytes()).unwrap();
        assert_eq!(payload.sender, Some(alice()));
        assert_eq!(payload.recipients, vec![bob()]);
        assert_eq!(payload.courtesy_recipients.len(), 1);
        let subject = payload.subject.unwrap();
        assert!(subject.default.is_none());
        assert_eq!(subject.translations.get("de").map(String::as_str), Some("Hallo"));
        assert!(payload.timestamp.is_some());
        assert_eq!(payload.required, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(payload.additional_headers.len(), 2);
        assert_eq!(payload.additional_headers[0].namespace.uri, "urn:example:ext");
        assert_eq!(payload.additional_headers[1].namespace, CpimNamespace::standard());
        assert_eq!(payload.content_type, "text/plain");
        assert_eq!(payload.charset.as_deref(), Some("utf-8"));
        assert_eq!(&payload.content[..], b"Hi");
    }

    #[test]
    fn test_decode_drops_prefix_declared_later() {
        let raw = "ext.Priority: high\r\n\
                   NS: ext <urn:example:ext>\r\n\
                   ext.Thread: 7\r\n\
                   a.b.c: dotted\r\n\
                   \r\n\
                   Content-Type: text/plain\r\n\
                   \r\n\
                   x";
        let payload = CpimPayload::decode(raw.as_bytes()).unwrap();
        assert_eq!(payload.additional_headers.len(), 1);
        assert_eq!(payload.additional_headers[0].name, "Thread");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            CpimPayload::decode(b"From: <sip:a@b>\r\nno terminator"),
            Err(CpimParseError::MissingSeparator)
        );
        assert_eq!(
            CpimPayload::decode(b"From: <sip:a@b>\r\n\r\nX-Nothing: here\r\n\r\nbody"),
            Err(CpimParseError::MissingContentType)
        );
    }

    #[test]
    fn test_decode_skips_malformed_identity() {
        let raw = b"From: not an identity\r\nTo: <sip:bob@example.com>\r\n\r\nContent-Type: text/plain\r\n\r\nhey";
        let payload = CpimPayload::decode(raw).unwrap();
        assert!(payload.sender.is_none());
        assert_eq!(payload.recipients.len(), 1);
    }

    #[test]
    fn test_decode_unwraps_imdn() {
        let raw = b"From: <sip:a@example.com>\r\n\r\n\
                    Content-Type: message/imdn+xml\r\n\r\n\
                    Content-Disposition: notification\r\n\r\n\
                    <imdn/>";
        let payload = CpimPayload::decode(raw).unwrap();
        assert_eq!(payload.content_type, "message/imdn+xml");
        assert_eq!(&payload.content[..], b"<imdn/>");
    }

    #[test]
    fn test_imdn_without_nested_part_roundtrips() {
        let xml = "<imdn><message-id>x</message-id></imdn>";
        let payload = CpimPayload::new(xml, IMDN_CONTENT_TYPE);
        let (bytes, _) = payload.encode();
        let decoded = CpimPayload::decode(&bytes).unwrap();
        assert_eq!(&decoded.content[..], xml.as_bytes());
        assert_eq!(decoded, payload);

        // a blank line inside the XML is not a header block
        let spaced = "<imdn>\r\n\r\n<status/></imdn>";
        let decoded = CpimPayload::decode(&CpimPayload::new(spaced, IMDN_CONTENT_TYPE).encode().0).unwrap();
        assert_eq!(&decoded.content[..], spaced.as_bytes());
    }

    #[test]
    fn test_header_values_keep_leading_whitespace() {
        let ns = CpimNamespace::new("urn:example:ext", "ext");
        for subject in ["  indented", "", " ", ";lang=fr not a tag"] {
            let mut payload = CpimPayload::new("x", "text/plain");
            payload.subject = Some(MultilingualText::new(subject).with_translation("fr", "  retrait"));
            payload.additional_headers = vec![CpimHeader::new("Note", ns.clone(), "  padded")];
            let decoded = CpimPayload::decode(&payload.encode().0).unwrap();
            assert_eq!(decoded.subject, payload.subject, "subject {:?}", subject);
            assert_eq!(decoded.additional_headers, payload.additional_headers);
        }
    }

    #[test]
    fn test_rebound_default_namespace_keeps_declarations() {
        let mut payload = CpimPayload::new("x", "text/plain");
        payload.additional_headers = vec![
            CpimHeader::new("Mood", CpimNamespace::new("urn:example:ext", ""), "calm"),
            CpimHeader::new("Thread", CpimNamespace::new("urn:example:other", "vnd"), "7"),
            CpimHeader::new("Tag", CpimNamespace::standard(), "plain"),
        ];
        let decoded = CpimPayload::decode(&payload.encode().0).unwrap();
        assert_eq!(decoded.additional_headers, payload.additional_headers);
    }

    #[test]
    fn test_decode_binary_body() {
        let mut raw = b"To: <sip:b@example.com>\r\n\r\nContent-Type: image/png\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0x89, 0x50, 0x00, 0xff]);
        let payload = CpimPayload::decode(&raw).unwrap();
        assert_eq!(&payload.content[..], &[0x89, 0x50, 0x00, 0xff]);
    }

    #[test]
    fn test_header_escaping() {
        let escaped = escape_header_value("tab\there \\ del\u{7f}");
        assert_eq!(escaped, "tab\\u0009here \\\\ del\\u007f");
        assert_eq!(unescape_header_value(&escaped), "tab\there \\ del\u{7f}");
        assert_eq!(unescape_header_value("C:\\x \\u12"), "C:\\x \\u12");
    }

    #[test]
    fn test_subject_escaping_roundtrip() {
        let mut payload = CpimPayload::new("x", "text/plain");
        payload.subject = Some(MultilingualText::new("line one\r\nline two"));
        let (bytes, _) = payload.encode();
        let decoded = CpimPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.subject, payload.subject);
    }
}
