//! Chat identities in `display-name <sip:user@host>` form.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ChatError, Result};

lazy_static! {
    static ref IDENTITY_RE: Regex =
        Regex::new(r#"^(?:"?(?P<display_name>[^<]*[^"\s])"?)?\s*<(?P<uri>sips?:.+)>$"#)
            .expect("identity pattern is valid");
}

/// A SIP URI reduced to what identity matching needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    /// `sip` or `sips`
    pub secure: bool,
    /// User part, if any
    pub user: Option<String>,
    /// Host part
    pub host: String,
    /// Port, if given
    pub port: Option<u16>,
    /// Raw `;name=value` parameters, in order
    pub parameters: Vec<String>,
}

impl SipUri {
    /// Create a `sip:user@host` URI.
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            secure: false,
            user: Some(user.into()),
            host: host.into(),
            port: None,
            parameters: Vec::new(),
        }
    }

    /// Parse `sip:[user@]host[:port][;params]`.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || ChatError::InvalidIdentity(format!("Cannot parse SIP URI: {value:?}"));

        let (secure, rest) = if let Some(rest) = value.strip_prefix("sips:") {
            (true, rest)
        } else if let Some(rest) = value.strip_prefix("sip:") {
            (false, rest)
        } else {
            return Err(invalid());
        };

        let mut sections = rest.split(';');
        let address = sections.next().unwrap_or("");
        let parameters = sections.map(str::to_string).collect();

        let (user, hostport) = match address.rsplit_once('@') {
            Some((user, hostport)) if !user.is_empty() => (Some(user.to_string()), hostport),
            Some(_) => return Err(invalid()),
            None => (None, address),
        };

        // IPv6 references keep their brackets and may contain colons
        let split = if hostport.starts_with('[') {
            hostport.rsplit_once("]:").map(|(h, p)| (&hostport[..=h.len()], p))
        } else {
            hostport.rsplit_once(':')
        };
        let (host, port) = match split {
            Some((host, port)) => (host, Some(port.parse::<u16>().map_err(|_| invalid())?)),
            None => (hostport, None),
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            secure,
            user,
            host: host.to_string(),
            port,
            parameters,
        })
    }

    /// User and host match (host compared case-insensitively).
    pub fn same_address(&self, other: &SipUri) -> bool {
        self.user == other.user && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.secure { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for param in &self.parameters {
            write!(f, ";{param}")?;
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A message sender or recipient.
///
/// Two identities are equal when their URIs share user and host; display
/// names, ports and parameters are ignored.
#[derive(Debug, Clone)]
pub struct ChatIdentity {
    /// Address of record
    pub uri: SipUri,
    /// Optional human readable name
    pub display_name: Option<String>,
}

impl ChatIdentity {
    /// Create an identity.
    pub fn new(uri: SipUri, display_name: Option<String>) -> Self {
        Self { uri, display_name }
    }

    /// Parse `Display Name <sip:user@host>` or `<sip:user@host>`.
    pub fn parse(value: &str) -> Result<Self> {
        let caps = IDENTITY_RE
            .captures(value.trim())
            .ok_or_else(|| ChatError::InvalidIdentity(format!("Cannot parse identity value: {value:?}")))?;
        let uri = SipUri::parse(&caps["uri"])?;
        let display_name = caps.name("display_name").map(|m| m.as_str().to_string());
        Ok(Self { uri, display_name })
    }

    /// Compare against a URI string; unparseable strings never match.
    pub fn matches(&self, uri: &str) -> bool {
        SipUri::parse(uri).map(|u| self.uri.same_address(&u)).unwrap_or(false)
    }
}

impl PartialEq for ChatIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.uri.same_address(&other.uri)
    }
}

impl Eq for ChatIdentity {}

impl PartialEq<SipUri> for ChatIdentity {
    fn eq(&self, other: &SipUri) -> bool {
        self.uri.same_address(other)
    }
}

impl Hash for ChatIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.user.hash(state);
        self.uri.host.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for ChatIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) if !name.is_empty() => write!(f, "{} <{}>", name, self.uri),
            _ => write!(f, "<{}>", self.uri),
        }
    }
}

impl FromStr for ChatIdentity {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity_with_display_name() {
        let id = ChatIdentity::parse("Alice Smith <sip:alice@example.com>").unwrap();
        assert_eq!(id.display_name.as_deref(), Some("Alice Smith"));
        assert_eq!(id.uri.user.as_deref(), Some("alice"));
        assert_eq!(id.uri.host, "example.com");
        assert_eq!(id.to_string(), "Alice Smith <sip:alice@example.com>");
    }

    #[test]
    fn test_parse_identity_quoted_and_bare() {
        let quoted = ChatIdentity::parse("\"Bob\" <sips:bob@example.org:5061;transport=tls>").unwrap();
        assert_eq!(quoted.display_name.as_deref(), Some("Bob"));
        assert!(quoted.uri.secure);
        assert_eq!(quoted.uri.port, Some(5061));
        assert_eq!(quoted.uri.parameters, vec!["transport=tls".to_string()]);

        let bare = ChatIdentity::parse("<sip:carol@example.net>").unwrap();
        assert!(bare.display_name.is_none());
        assert_eq!(bare.to_string(), "<sip:carol@example.net>");
    }

    #[test]
    fn test_parse_identity_rejects_garbage() {
        assert!(ChatIdentity::parse("alice@example.com").is_err());
        assert!(ChatIdentity::parse("<mailto:alice@example.com>").is_err());
        assert!(SipUri::parse("sip:").is_err());
    }

    #[test]
    fn test_identity_equality_ignores_display_name_and_port() {
        let a = ChatIdentity::parse("Alice <sip:alice@Example.com:5060>").unwrap();
        let b = ChatIdentity::parse("<sip:alice@example.com>").unwrap();
        let c = ChatIdentity::parse("<sip:bob@example.com>").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.matches("sip:alice@example.com"));
        assert!(!a.matches("not a uri"));
    }
}
