//! Pure connection plan decision.

use super::{Direction, NegotiationError};
use crate::config::{AccountConfig, ConnectionModel, RelayConfig};
use crate::transport::{ConnectorSpec, Role, TransportKind, DEFAULT_MSRP_PORT};

/// Everything the decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct NegotiationInput<'a> {
    /// Account settings
    pub account: &'a AccountConfig,
    /// A local TLS certificate is configured
    pub has_certificate: bool,
    /// Session direction
    pub direction: Direction,
    /// Remote `setup` attribute (incoming only)
    pub remote_role: Option<Role>,
}

/// Chosen connector and the role we advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPlan {
    /// Connector to create
    pub connector: ConnectorSpec,
    /// Role to put in our `setup` attribute
    pub local_role: Role,
}

impl ConnectionPlan {
    fn direct_active() -> Self {
        Self {
            connector: ConnectorSpec::DirectConnector,
            local_role: Role::Active,
        }
    }
}

/// Decide connector and local role.
pub fn decide(input: NegotiationInput<'_>) -> Result<ConnectionPlan, NegotiationError> {
    let account = input.account;
    let outgoing = input.direction.is_outgoing();
    let remote_defers = matches!(input.remote_role, Some(Role::Actpass | Role::Passive));
    let tls = account.transport == TransportKind::Tls;

    if account.is_local_network() {
        if outgoing {
            return Ok(ConnectionPlan::direct_active());
        }
        if tls && !input.has_certificate {
            return Err(NegotiationError::NoCertificate);
        }
        return Ok(ConnectionPlan {
            connector: ConnectorSpec::DirectAcceptor,
            local_role: Role::Passive,
        });
    }

    // `passive` from an offerer is not allowed by RFC 6135 but some clients send it
    if !outgoing && remote_defers {
        tracing::debug!("Remote offered {:?}, answering as direct active", input.remote_role);
        return Ok(ConnectionPlan::direct_active());
    }

    match account.connection_model {
        ConnectionModel::Relay => {
            if outgoing && (!account.use_relay_for_outbound || account.relay().is_none()) {
                return Ok(ConnectionPlan::direct_active());
            }
            let relay = match account.relay() {
                Some(relay) => {
                    if relay.transport != account.transport {
                        return Err(NegotiationError::RelayConflict);
                    }
                    relay.clone()
                },
                None => discovered_relay(account)?,
            };
            Ok(ConnectionPlan {
                connector: ConnectorSpec::Relay {
                    relay,
                    mode: Role::Passive,
                },
                local_role: if outgoing { Role::Actpass } else { Role::Passive },
            })
        },
        ConnectionModel::Direct => {
            if !outgoing && tls && !input.has_certificate {
                return Err(NegotiationError::NoCertificate);
            }
            Ok(ConnectionPlan {
                connector: ConnectorSpec::DirectAcceptor,
                local_role: if outgoing { Role::Actpass } else { Role::Passive },
            })
        },
    }
}

/// Relay located through the account domain when none is configured.
fn discovered_relay(account: &AccountConfig) -> Result<RelayConfig, NegotiationError> {
    let domain = account
        .uri
        .rsplit_once('@')
        .map_or(account.uri.as_str(), |(_, host)| host);
    if domain.is_empty() {
        return Err(NegotiationError::MissingRelay);
    }
    Ok(RelayConfig {
        host: domain.to_string(),
        port: DEFAULT_MSRP_PORT,
        transport: account.transport,
    })
}
