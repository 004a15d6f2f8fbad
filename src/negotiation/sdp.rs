//! The slice of SDP a chat stream reads and writes: one `m=message` section.

use std::fmt;

use crate::error::{ChatError, Result};
use crate::transport::{format_path, MsrpUri, Role, TransportKind};

/// One media section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media type (`message`)
    pub media: String,
    /// Port
    pub port: u16,
    /// Transport protocol (`TCP/TLS/MSRP`)
    pub transport: String,
    /// Format list (`*`)
    pub formats: Vec<String>,
    /// `c=` address
    pub connection: Option<String>,
    /// Attributes in order; value is empty for flag attributes
    pub attributes: Vec<(String, String)>,
}

impl MediaDescription {
    /// First value of attribute `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether attribute `name` is present.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.iter().any(|(n, _)| n == name)
    }

    /// Append an attribute.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((name.into(), value.into()));
    }

    /// Media direction; `sendrecv` when no direction attribute is present.
    pub fn direction(&self) -> &str {
        ["sendonly", "recvonly", "inactive", "sendrecv"]
            .into_iter()
            .find(|d| self.has(d))
            .unwrap_or("sendrecv")
    }

    /// Space separated list attribute (`accept-types`, `chatroom`, ...).
    pub fn list(&self, name: &str) -> Vec<String> {
        self.first(name)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Parse `m=`, `c=` and `a=` lines of a single media section.
    pub fn parse(text: &str) -> Result<Self> {
        let mut media = Self::default();
        let mut seen_m = false;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((kind, value)) = line.split_once('=') else {
                return Err(ChatError::InvalidStream(format!("Malformed SDP line: {line:?}")));
            };
            match kind {
                "m" => {
                    let mut fields = value.split_whitespace();
                    media.media = fields.next().unwrap_or_default().to_string();
                    media.port = fields
                        .next()
                        .and_then(|p| p.split('/').next())
                        .and_then(|p| p.parse().ok())
                        .ok_or_else(|| ChatError::InvalidStream(format!("Malformed media line: {line:?}")))?;
                    media.transport = fields.next().unwrap_or_default().to_string();
                    media.formats = fields.map(str::to_string).collect();
                    seen_m = true;
                },
                "c" => media.connection = value.split_whitespace().nth(2).map(str::to_string),
                "a" => match value.split_once(':') {
                    Some((name, val)) => media.push(name, val),
                    None => media.push(value, ""),
                },
                _ => {},
            }
        }

        if !seen_m {
            return Err(ChatError::InvalidStream("SDP has no media line".to_string()));
        }
        Ok(media)
    }
}

impl fmt::Display for MediaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "m={} {} {} {}", self.media, self.port, self.transport, self.formats.join(" "))?;
        if let Some(address) = &self.connection {
            let family = if address.contains(':') { "IP6" } else { "IP4" };
            writeln!(f, "c=IN {} {}", family, address)?;
        }
        for (name, value) in &self.attributes {
            if value.is_empty() {
                writeln!(f, "a={}", name)?;
            } else {
                writeln!(f, "a={}:{}", name, value)?;
            }
        }
        Ok(())
    }
}

/// Build our media section from the prepared path.
pub fn build_local_media(
    path: &[MsrpUri],
    direction: &str,
    accept_types: &[String],
    accept_wrapped_types: &[String],
    local_role: Role,
) -> MediaDescription {
    let last = path.last();
    let transport = last.map(TransportKind::from_uri).unwrap_or_default();

    let mut media = MediaDescription {
        media: "message".to_string(),
        port: last.map_or(crate::transport::DEFAULT_MSRP_PORT, MsrpUri::port_or_default),
        transport: transport.sdp_protocol().to_string(),
        formats: vec!["*".to_string()],
        connection: last.map(|uri| uri.host.clone()),
        attributes: Vec::new(),
    };

    media.push("path", format_path(path));
    if direction != "sendrecv" {
        media.push(direction, "");
    }
    media.push("accept-types", accept_types.join(" "));
    if !accept_wrapped_types.is_empty() {
        media.push("accept-wrapped-types", accept_wrapped_types.join(" "));
    }
    media.push("setup", local_role.as_str());
    media
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMOTE: &str = "m=message 2856 TCP/TLS/MSRP *\r\n\
                          c=IN IP4 198.51.100.7\r\n\
                          a=path:msrps://198.51.100.7:2856/remote1;tcp\r\n\
                          a=accept-types:message/cpim text/plain\r\n\
                          a=setup:passive\r\n";

    #[test]
    fn test_parse_media() {
        let media = MediaDescription::parse(REMOTE).unwrap();
        assert_eq!(media.media, "message");
        assert_eq!(media.port, 2856);
        assert_eq!(media.transport, "TCP/TLS/MSRP");
        assert_eq!(media.formats, vec!["*".to_string()]);
        assert_eq!(media.connection.as_deref(), Some("198.51.100.7"));
        assert_eq!(media.first("setup"), Some("passive"));
        assert_eq!(media.list("accept-types").len(), 2);
        assert_eq!(media.direction(), "sendrecv");
        assert!(MediaDescription::parse("a=setup:active").is_err());
    }

    #[test]
    fn test_build_local_media() {
        let path = vec![MsrpUri::parse("msrps://192.0.2.1:40000/local1;tcp").unwrap()];
        let types = vec!["message/cpim".to_string(), "text/*".to_string()];
        let media = build_local_media(&path, "sendrecv", &types, &[], Role::Actpass);
        assert_eq!(media.port, 40000);
        assert_eq!(media.transport, "TCP/TLS/MSRP");
        assert_eq!(media.first("path"), Some("msrps://192.0.2.1:40000/local1;tcp"));
        assert_eq!(media.first("setup"), Some("actpass"));
        assert!(!media.has("accept-wrapped-types"));

        let reparsed = MediaDescription::parse(&media.to_string()).unwrap();
        assert_eq!(reparsed, media);
    }

    #[test]
    fn test_build_local_media_direction_and_default_port() {
        let path = vec![MsrpUri::parse("msrp://192.0.2.1/local1;tcp").unwrap()];
        let media = build_local_media(&path, "recvonly", &["text/*".to_string()], &[], Role::Passive);
        assert_eq!(media.port, 2855);
        assert_eq!(media.transport, "TCP/MSRP");
        assert_eq!(media.direction(), "recvonly");
    }
}
