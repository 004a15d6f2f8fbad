//! Drives a connector through prepare, role switch and completion.

use std::sync::Arc;

use super::{ConnectionPlan, MismatchPhase, NegotiationError};
use crate::transport::{
    ActiveChannel, Connector, ConnectorFactory, ConnectorSpec, EndpointHint, MsrpUri, Role, TransportKind,
};

/// Owns the connector for one stream until completion.
pub struct NegotiationEngine {
    factory: Arc<dyn ConnectorFactory>,
    plan: ConnectionPlan,
    transport: TransportKind,
    credentials: Option<String>,
    connector: Box<dyn Connector>,
    local_role: Role,
    local_path: Vec<MsrpUri>,
    hint: Option<EndpointHint>,
}

impl std::fmt::Debug for NegotiationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationEngine")
            .field("plan", &self.plan)
            .field("transport", &self.transport)
            .field("local_role", &self.local_role)
            .field("local_path", &self.local_path)
            .finish_non_exhaustive()
    }
}

impl NegotiationEngine {
    /// Create the connector the plan asks for.
    pub fn new(
        factory: Arc<dyn ConnectorFactory>,
        plan: ConnectionPlan,
        transport: TransportKind,
        credentials: Option<String>,
    ) -> Self {
        let connector = factory.create(&plan.connector);
        let local_role = plan.local_role;
        Self {
            factory,
            plan,
            transport,
            credentials,
            connector,
            local_role,
            local_path: Vec::new(),
            hint: None,
        }
    }

    /// Role currently advertised.
    pub fn local_role(&self) -> Role {
        self.local_role
    }

    /// Plan the engine was created from.
    pub fn plan(&self) -> &ConnectionPlan {
        &self.plan
    }

    /// Path returned by the last prepare.
    pub fn local_path(&self) -> &[MsrpUri] {
        &self.local_path
    }

    /// Negotiated transport.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Allocate the local endpoint on `local_address`.
    pub async fn prepare(&mut self, local_address: &str) -> Result<Vec<MsrpUri>, NegotiationError> {
        let hint = EndpointHint {
            uri: MsrpUri::new(local_address, Some(0), self.transport.is_secure()),
            credentials: self.credentials.clone(),
        };
        tracing::debug!(
            "Preparing {} endpoint on {} as {}",
            self.plan.connector.name(),
            local_address,
            self.local_role
        );
        self.local_path = self.connector.prepare(hint.clone()).await?;
        self.hint = Some(hint);
        if self.local_path.is_empty() {
            return Err(NegotiationError::Connector(crate::transport::TransportError::Setup(
                "connector returned an empty path".to_string(),
            )));
        }
        Ok(self.local_path.clone())
    }

    /// Reject a remote path whose first hop uses another transport.
    pub fn check_remote_path(&self, remote_path: &[MsrpUri]) -> Result<(), NegotiationError> {
        let first = remote_path.first().ok_or(NegotiationError::MissingPath)?;
        let remote = TransportKind::from_uri(first);
        if remote != self.transport {
            return Err(NegotiationError::TransportMismatch {
                phase: MismatchPhase::Completion,
                remote: remote.to_string(),
                local: self.transport.to_string(),
            });
        }
        Ok(())
    }

    /// Switch to `active` when we offered `actpass` and the answer is
    /// `passive`. A relay only flips its mode; a direct endpoint is replaced
    /// by a connector reusing the allocated local URI.
    pub async fn apply_remote_setup(&mut self, remote_role: Role) -> Result<(), NegotiationError> {
        if self.local_role != Role::Actpass || remote_role != Role::Passive {
            return Ok(());
        }

        if self.plan.connector.is_relay() {
            tracing::debug!("Remote answered passive, switching relay connection to active");
            self.connector.set_mode(Role::Active);
        } else {
            tracing::debug!("Remote answered passive, replacing acceptor with a direct connector");
            let uri = self
                .connector
                .local_uri()
                .or_else(|| self.hint.as_ref().map(|h| h.uri.clone()))
                .ok_or(NegotiationError::MissingPath)?;
            self.connector.cleanup();
            self.connector = self.factory.create(&ConnectorSpec::DirectConnector);
            self.local_path = self
                .connector
                .prepare(EndpointHint {
                    uri,
                    credentials: self.credentials.clone(),
                })
                .await?;
        }
        self.local_role = Role::Active;
        Ok(())
    }

    /// Connect to the remote path.
    pub async fn complete(&mut self, remote_path: Vec<MsrpUri>) -> Result<ActiveChannel, NegotiationError> {
        Ok(self.connector.complete(remote_path).await?)
    }

    /// Release the prepared endpoint.
    pub fn cleanup(&mut self) {
        self.connector.cleanup();
    }
}
