//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`MSRP_CHAT_*`)
//!
//! ```toml
//! [account]
//! kind = "sip"
//! uri = "alice@example.com"
//! transport = "tls"
//! connection_model = "relay"
//! use_relay_for_outbound = true
//!
//! [account.relay]
//! host = "relay.example.com"
//! port = 2855
//! transport = "tls"
//!
//! [tls]
//! certificate = "/etc/msrp/alice.pem"
//!
//! [chat]
//! prefer_cpim = true
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::transport::{TransportKind, DEFAULT_MSRP_PORT};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Account the streams belong to
    #[serde(default)]
    pub account: AccountConfig,

    /// TLS settings
    #[serde(default)]
    pub tls: TlsConfig,

    /// Chat stream behaviour
    #[serde(default)]
    pub chat: ChatConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ChatError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content).map_err(|e| ChatError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/msrp-chat/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("msrp-chat").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Account settings
        if let Ok(uri) = std::env::var("MSRP_CHAT_ACCOUNT_URI") {
            config.account.uri = uri;
        }
        if let Ok(kind) = std::env::var("MSRP_CHAT_ACCOUNT_KIND") {
            match kind.to_lowercase().as_str() {
                "sip" => config.account.kind = AccountKind::Sip,
                "local-network" | "bonjour" => config.account.kind = AccountKind::LocalNetwork,
                other => tracing::warn!("Ignoring unknown MSRP_CHAT_ACCOUNT_KIND {:?}", other),
            }
        }
        if let Ok(transport) = std::env::var("MSRP_CHAT_TRANSPORT") {
            if let Ok(transport) = transport.parse() {
                config.account.transport = transport;
            }
        }
        if let Ok(model) = std::env::var("MSRP_CHAT_CONNECTION_MODEL") {
            match model.to_lowercase().as_str() {
                "direct" => config.account.connection_model = ConnectionModel::Direct,
                "relay" => config.account.connection_model = ConnectionModel::Relay,
                other => tracing::warn!("Ignoring unknown MSRP_CHAT_CONNECTION_MODEL {:?}", other),
            }
        }
        if let Ok(host) = std::env::var("MSRP_CHAT_RELAY_HOST") {
            let mut relay = config.account.relay.take().unwrap_or_default();
            relay.host = host;
            if let Ok(port) = std::env::var("MSRP_CHAT_RELAY_PORT") {
                if let Ok(port) = port.parse() {
                    relay.port = port;
                }
            }
            if let Ok(transport) = std::env::var("MSRP_CHAT_RELAY_TRANSPORT") {
                if let Ok(transport) = transport.parse() {
                    relay.transport = transport;
                }
            }
            config.account.relay = Some(relay);
        }
        if let Ok(val) = std::env::var("MSRP_CHAT_USE_RELAY_FOR_OUTBOUND") {
            if let Ok(val) = val.parse() {
                config.account.use_relay_for_outbound = val;
            }
        }
        if let Ok(credentials) = std::env::var("MSRP_CHAT_TLS_CREDENTIALS") {
            config.account.tls_credentials = Some(credentials);
        }

        // TLS settings
        if let Ok(path) = std::env::var("MSRP_CHAT_TLS_CERTIFICATE") {
            config.tls.certificate = Some(PathBuf::from(path));
        }

        // Chat settings
        if let Ok(val) = std::env::var("MSRP_CHAT_PREFER_CPIM") {
            if let Ok(val) = val.parse() {
                config.chat.prefer_cpim = val;
            }
        }
        if let Ok(val) = std::env::var("MSRP_CHAT_AUTO_START_ENCRYPTION") {
            if let Ok(val) = val.parse() {
                config.chat.auto_start_encryption = val;
            }
        }

        config
    }
}

/// Account flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    /// Regular SIP account
    #[default]
    Sip,
    /// Zero-configuration local network account; always direct
    LocalNetwork,
}

/// How MSRP connections are established for a SIP account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionModel {
    /// Through an MSRP relay (default)
    #[default]
    Relay,
    /// Directly between the endpoints
    Direct,
}

/// MSRP relay coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay host
    pub host: String,

    /// Relay port
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Transport towards the relay
    #[serde(default)]
    pub transport: TransportKind,
}

fn default_relay_port() -> u16 {
    DEFAULT_MSRP_PORT
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_MSRP_PORT,
            transport: TransportKind::Tls,
        }
    }
}

/// Account configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Account flavour
    pub kind: AccountKind,

    /// Address of record, `user@host`
    pub uri: String,

    /// Password (unused by the chat core, kept for the host application)
    pub password: Option<String>,

    /// MSRP transport
    pub transport: TransportKind,

    /// Direct or relayed connections
    pub connection_model: ConnectionModel,

    /// Relay to use with the relay model
    pub relay: Option<RelayConfig>,

    /// Use the relay for outgoing sessions too
    pub use_relay_for_outbound: bool,

    /// TLS credentials reference handed to the transport
    pub tls_credentials: Option<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            kind: AccountKind::Sip,
            uri: String::new(),
            password: None,
            transport: TransportKind::Tls,
            connection_model: ConnectionModel::Relay,
            relay: None,
            use_relay_for_outbound: true,
            tls_credentials: None,
        }
    }
}

impl AccountConfig {
    /// Whether this is a local network account
    pub fn is_local_network(&self) -> bool {
        self.kind == AccountKind::LocalNetwork
    }

    /// Relay coordinates, if the account has any
    pub fn relay(&self) -> Option<&RelayConfig> {
        self.relay.as_ref().filter(|r| !r.host.is_empty())
    }
}

/// TLS configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Local certificate; required to accept incoming TLS connections
    pub certificate: Option<PathBuf>,
}

impl TlsConfig {
    /// Whether a local certificate is configured
    pub fn has_certificate(&self) -> bool {
        self.certificate.is_some()
    }
}

/// Chat stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Wrap messages in CPIM even when not strictly needed
    pub prefer_cpim: bool,

    /// Start the encryption handshake when the stream starts
    pub auto_start_encryption: bool,

    /// Types accepted directly
    pub accept_types: Vec<String>,

    /// Types accepted inside CPIM
    pub accept_wrapped_types: Vec<String>,

    /// Default composing refresh interval in seconds
    pub composing_refresh: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            prefer_cpim: true,
            auto_start_encryption: true,
            accept_types: vec![
                "message/cpim".to_string(),
                "text/*".to_string(),
                "image/*".to_string(),
                "application/im-iscomposing+xml".to_string(),
            ],
            accept_wrapped_types: vec![
                "text/*".to_string(),
                "image/*".to_string(),
                "application/im-iscomposing+xml".to_string(),
            ],
            composing_refresh: 120,
        }
    }
}
