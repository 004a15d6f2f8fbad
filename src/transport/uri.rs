//! MSRP URIs (`msrp://host:port/session-id;tcp`).

use std::fmt;
use std::str::FromStr;

use super::TransportError;

/// Port used when a URI does not name one.
pub const DEFAULT_MSRP_PORT: u16 = 2855;

/// One hop of an MSRP path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MsrpUri {
    /// `msrps` scheme
    pub secure: bool,
    /// Optional user part (relay authentication)
    pub user: Option<String>,
    /// Host name or address
    pub host: String,
    /// Port, if given
    pub port: Option<u16>,
    /// Session identifier (may be empty for relay URIs)
    pub session_id: String,
    /// Transport parameter, normally `tcp`
    pub transport: String,
    /// Further `;name=value` parameters
    pub parameters: Vec<String>,
}

impl MsrpUri {
    /// URI for `host` with no session id yet.
    pub fn new(host: impl Into<String>, port: Option<u16>, secure: bool) -> Self {
        Self {
            secure,
            user: None,
            host: host.into(),
            port,
            session_id: String::new(),
            transport: "tcp".to_string(),
            parameters: Vec::new(),
        }
    }

    /// Set the session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// `msrp` or `msrps`.
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "msrps"
        } else {
            "msrp"
        }
    }

    /// Port, falling back to [`DEFAULT_MSRP_PORT`].
    pub fn port_or_default(&self) -> u16 {
        self.port.filter(|p| *p != 0).unwrap_or(DEFAULT_MSRP_PORT)
    }

    /// Parse a URI.
    pub fn parse(value: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidUri(value.to_string());

        let (secure, rest) = if let Some(rest) = value.strip_prefix("msrps://") {
            (true, rest)
        } else if let Some(rest) = value.strip_prefix("msrp://") {
            (false, rest)
        } else {
            return Err(invalid());
        };

        let (authority, tail) = match rest.find(['/', ';']) {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, ""),
        };

        let (user, hostport) = match authority.rsplit_once('@') {
            Some((user, hostport)) => (Some(user.to_string()), hostport),
            None => (None, authority),
        };

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

        let tail = tail.strip_prefix('/').unwrap_or(tail);
        let mut sections = tail.split(';');
        let session_id = sections.next().unwrap_or("").to_string();
        let transport = sections.next().ok_or_else(invalid)?.to_ascii_lowercase();
        if transport.is_empty() {
            return Err(invalid());
        }
        let parameters = sections.map(str::to_string).collect();

        Ok(Self {
            secure,
            user,
            host: host.to_string(),
            port,
            session_id,
            transport,
            parameters,
        })
    }
}

impl fmt::Display for MsrpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme())?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if !self.session_id.is_empty() {
            write!(f, "/{}", self.session_id)?;
        }
        write!(f, ";{}", self.transport)?;
        for param in &self.parameters {
            write!(f, ";{param}")?;
        }
        Ok(())
    }
}

impl FromStr for MsrpUri {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse a space separated `path` attribute.
pub fn parse_path(value: &str) -> Result<Vec<MsrpUri>, TransportError> {
    value.split_whitespace().map(MsrpUri::parse).collect()
}

/// Format a path for the `path` attribute.
pub fn format_path(path: &[MsrpUri]) -> String {
    path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}
