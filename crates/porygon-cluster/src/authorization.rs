//! Access reviews and operator authentication

use std::sync::Arc;

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use reqwest::Method;
use tracing::{debug, info};

use crate::command::PrivilegedCommand;
use crate::gateway::ClusterGateway;
use porygon_common::{validate_namespace, Error};

const ACCESS_REVIEW_PATH: &str = "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews";

/// API group of a resource plural; `None` is the core group
fn api_group(resource: &str) -> Option<&'static str> {
    match resource.split('/').next().unwrap_or(resource) {
        "deployments" | "replicasets" | "statefulsets" | "daemonsets" | "controllerrevisions" => {
            Some("apps")
        }
        "roles" | "rolebindings" => Some("rbac.authorization.k8s.io"),
        _ => None,
    }
}

/// Asks the cluster what the gateway's identity may do
pub struct AuthorizationProbe {
    gateway: Arc<dyn ClusterGateway>,
}

impl AuthorizationProbe {
    /// Create a probe over a gateway
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// Whether the current identity may perform `verb` on `resource` in `namespace`
    ///
    /// Every call is a fresh SelfSubjectAccessReview; nothing is cached. A
    /// review without a `status.allowed` flag counts as not allowed.
    pub async fn check_permission(
        &self,
        namespace: &str,
        resource: &str,
        verb: &str,
    ) -> Result<bool, Error> {
        validate_namespace("namespace", namespace)?;
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(namespace.to_string()),
                    group: api_group(resource).map(str::to_string),
                    resource: Some(resource.to_string()),
                    verb: Some(verb.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let response = self
            .gateway
            .request(
                Method::POST,
                ACCESS_REVIEW_PATH,
                Some(serde_json::to_value(&review)?),
            )
            .await?;

        let allowed = response
            .pointer("/status/allowed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        debug!(
            namespace = %namespace,
            resource = %resource,
            verb = %verb,
            allowed,
            "access review"
        );
        Ok(allowed)
    }

    /// Like [`check_permission`](Self::check_permission) but a denial is an error
    pub async fn require_permission(
        &self,
        namespace: &str,
        resource: &str,
        verb: &str,
    ) -> Result<(), Error> {
        if self.check_permission(namespace, resource, verb).await? {
            Ok(())
        } else {
            Err(Error::permission_denied(namespace, resource, verb))
        }
    }

    /// Log the cluster CLI in with the gateway's credential
    pub async fn authenticate(&self) -> Result<(), Error> {
        let output = self
            .gateway
            .run_privileged_command(&PrivilegedCommand::Login)
            .await?;
        info!(output = %output, "operator authenticated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockClusterGateway;

    fn review_response(allowed: bool) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "authorization.k8s.io/v1",
            "kind": "SelfSubjectAccessReview",
            "status": { "allowed": allowed }
        })
    }

    #[tokio::test]
    async fn check_permission_sends_review_and_returns_allowed() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .withf(|method, path, body| {
                let attrs = &body.as_ref().unwrap()["spec"]["resourceAttributes"];
                *method == Method::POST
                    && path == ACCESS_REVIEW_PATH
                    && body.as_ref().unwrap()["kind"] == "SelfSubjectAccessReview"
                    && attrs["namespace"] == "shop"
                    && attrs["group"] == "apps"
                    && attrs["resource"] == "deployments"
                    && attrs["verb"] == "patch"
            })
            .times(1)
            .returning(|_, _, _| Ok(review_response(true)));

        let probe = AuthorizationProbe::new(Arc::new(gw));
        assert!(probe
            .check_permission("shop", "deployments", "patch")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn core_resources_carry_no_group() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .withf(|_, _, body| {
                body.as_ref().unwrap()["spec"]["resourceAttributes"]
                    .get("group")
                    .is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(review_response(true)));

        let probe = AuthorizationProbe::new(Arc::new(gw));
        assert!(probe.check_permission("shop", "pods", "list").await.unwrap());
    }

    #[test]
    fn workload_resources_resolve_to_apps() {
        assert_eq!(api_group("deployments"), Some("apps"));
        assert_eq!(api_group("deployments/scale"), Some("apps"));
        assert_eq!(api_group("rolebindings"), Some("rbac.authorization.k8s.io"));
        assert_eq!(api_group("serviceaccounts"), None);
    }

    #[tokio::test]
    async fn check_permission_is_never_cached() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .times(2)
            .returning(|_, _, _| Ok(review_response(false)));

        let probe = AuthorizationProbe::new(Arc::new(gw));
        assert!(!probe.check_permission("shop", "pods", "list").await.unwrap());
        assert!(!probe.check_permission("shop", "pods", "list").await.unwrap());
    }

    #[tokio::test]
    async fn missing_status_counts_as_denied() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .returning(|_, _, _| Ok(serde_json::json!({ "status": {} })));

        let probe = AuthorizationProbe::new(Arc::new(gw));
        assert!(!probe.check_permission("shop", "pods", "get").await.unwrap());
    }

    #[tokio::test]
    async fn require_permission_maps_denial_to_error() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .returning(|_, _, _| Ok(review_response(false)));

        let probe = AuthorizationProbe::new(Arc::new(gw));
        let err = probe
            .require_permission("shop", "deployments", "patch")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn authenticate_runs_login() {
        let mut gw = MockClusterGateway::new();
        gw.expect_run_privileged_command()
            .withf(|cmd| *cmd == PrivilegedCommand::Login)
            .times(1)
            .returning(|_| Ok("Logged into cluster".to_string()));

        let probe = AuthorizationProbe::new(Arc::new(gw));
        probe.authenticate().await.unwrap();
    }

    #[tokio::test]
    async fn authenticate_propagates_command_failure() {
        let mut gw = MockClusterGateway::new();
        gw.expect_run_privileged_command()
            .returning(|_| Err(Error::command("oc login", "invalid token")));

        let probe = AuthorizationProbe::new(Arc::new(gw));
        let err = probe.authenticate().await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }
}
