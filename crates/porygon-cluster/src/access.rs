//! Namespace onboarding: operator login, identity, grant, token

use std::sync::Arc;

use tracing::{info, instrument};

use crate::authorization::AuthorizationProbe;
use crate::gateway::ClusterGateway;
use crate::identity::IdentityManager;
use crate::rbac::PermissionManager;
use porygon_common::{validate_name, validate_namespace, ClusterCredential, Error};

/// Sets up scoped automation access inside a namespace
///
/// Runs with the operator's own credential. Each step is idempotent except
/// token minting, so a failed setup can simply be retried by the caller.
pub struct AccessCoordinator {
    cluster_endpoint: String,
    probe: AuthorizationProbe,
    identities: IdentityManager,
    permissions: PermissionManager,
}

impl AccessCoordinator {
    /// Create a coordinator; `cluster_endpoint` is echoed into the returned credential
    pub fn new(gateway: Arc<dyn ClusterGateway>, cluster_endpoint: impl Into<String>) -> Self {
        Self {
            cluster_endpoint: cluster_endpoint.into(),
            probe: AuthorizationProbe::new(gateway.clone()),
            identities: IdentityManager::new(gateway.clone()),
            permissions: PermissionManager::new(gateway),
        }
    }

    /// Authenticate, ensure the ServiceAccount and its grant, then mint a token
    ///
    /// The first failing step aborts the flow and its error is returned as is.
    /// Steps already applied are not rolled back.
    #[instrument(skip(self))]
    pub async fn setup_access(
        &self,
        namespace: &str,
        identity_name: &str,
    ) -> Result<ClusterCredential, Error> {
        validate_namespace("namespace", namespace)?;
        validate_name("serviceAccountName", identity_name)?;
        self.probe.authenticate().await?;
        self.identities.ensure_exists(namespace, identity_name).await?;
        self.permissions.ensure_grant(namespace, identity_name).await?;
        let token = self.identities.mint_token(namespace, identity_name).await?;

        info!("automation access ready");
        Ok(ClusterCredential::new(self.cluster_endpoint.clone(), token))
    }
}
