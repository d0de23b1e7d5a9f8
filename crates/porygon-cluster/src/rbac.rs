//! Role and RoleBinding reconciliation
//!
//! The automation ServiceAccount gets exactly one Role with a fixed rule set
//! and one RoleBinding. The Role is rewritten on every reconcile so manual
//! edits are reverted; the binding is created once and never touched again.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use reqwest::Method;
use tracing::{debug, info};

use crate::gateway::ClusterGateway;
use crate::{LABEL_MANAGED_BY, MANAGED_BY_PORYGON};
use porygon_common::{validate_name, validate_namespace, Error, ROLE_BINDING_NAME, ROLE_NAME};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Verbs granted on deployments and their scale subresource
const DEPLOYMENT_VERBS: [&str; 5] = ["get", "list", "watch", "patch", "update"];

/// Verbs granted on pods
const POD_VERBS: [&str; 3] = ["get", "list", "watch"];

fn roles_path(namespace: &str) -> String {
    format!("/apis/{}/v1/namespaces/{}/roles", RBAC_GROUP, namespace)
}

fn role_bindings_path(namespace: &str) -> String {
    format!("/apis/{}/v1/namespaces/{}/rolebindings", RBAC_GROUP, namespace)
}

fn labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from([(
        LABEL_MANAGED_BY.to_string(),
        MANAGED_BY_PORYGON.to_string(),
    )]))
}

fn rule(group: &str, resource: &str, verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(vec![resource.to_string()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// The Role every managed namespace converges to
pub fn canonical_role(namespace: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(ROLE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: labels(),
            ..Default::default()
        },
        rules: Some(vec![
            rule("apps", "deployments", &DEPLOYMENT_VERBS),
            rule("apps", "deployments/scale", &DEPLOYMENT_VERBS),
            rule("", "pods", &POD_VERBS),
        ]),
    }
}

/// Binding of the canonical Role to `identity_name`
pub fn canonical_binding(namespace: &str, identity_name: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(ROLE_BINDING_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: labels(),
            ..Default::default()
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: identity_name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: ROLE_NAME.to_string(),
        },
    }
}

/// Reconciles the fixed permission grant of a namespace
pub struct PermissionManager {
    gateway: Arc<dyn ClusterGateway>,
}

impl PermissionManager {
    /// Create a manager over a gateway
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// Converge the Role, then make sure the RoleBinding exists
    pub async fn ensure_grant(&self, namespace: &str, identity_name: &str) -> Result<(), Error> {
        validate_namespace("namespace", namespace)?;
        validate_name("serviceAccountName", identity_name)?;
        self.ensure_role(namespace).await?;
        self.ensure_binding(namespace, identity_name).await
    }

    async fn ensure_role(&self, namespace: &str) -> Result<(), Error> {
        let collection = roles_path(namespace);
        let path = format!("{}/{}", collection, ROLE_NAME);
        let body = serde_json::to_value(canonical_role(namespace))?;

        if self.gateway.resource_exists(&path).await? {
            self.gateway.request(Method::PUT, &path, Some(body)).await?;
            info!(namespace = %namespace, role = ROLE_NAME, "reset Role to canonical rules");
        } else {
            self.gateway
                .request(Method::POST, &collection, Some(body))
                .await?;
            info!(namespace = %namespace, role = ROLE_NAME, "created Role");
        }
        Ok(())
    }

    async fn ensure_binding(&self, namespace: &str, identity_name: &str) -> Result<(), Error> {
        let collection = role_bindings_path(namespace);
        let path = format!("{}/{}", collection, ROLE_BINDING_NAME);

        if self.gateway.resource_exists(&path).await? {
            debug!(namespace = %namespace, binding = ROLE_BINDING_NAME, "RoleBinding already exists");
            return Ok(());
        }

        let body = serde_json::to_value(canonical_binding(namespace, identity_name))?;
        self.gateway
            .request(Method::POST, &collection, Some(body))
            .await?;
        info!(
            namespace = %namespace,
            binding = ROLE_BINDING_NAME,
            service_account = %identity_name,
            "created RoleBinding"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockClusterGateway;
    use mockall::Sequence;
    use serde_json::Value;
    use std::sync::Mutex;

    const ROLE_PATH: &str =
        "/apis/rbac.authorization.k8s.io/v1/namespaces/shop/roles/porygon-deployment-editor";
    const BINDING_PATH: &str = "/apis/rbac.authorization.k8s.io/v1/namespaces/shop/rolebindings/porygon-deployment-editor-binding";

    /// In-memory cluster holding at most one Role and one RoleBinding
    #[derive(Default)]
    struct Store {
        role: Option<Value>,
        binding: Option<Value>,
        mutations: Vec<(Method, String)>,
    }

    fn stateful_gateway(store: Arc<Mutex<Store>>) -> MockClusterGateway {
        let mut gw = MockClusterGateway::new();

        let recorded = store.clone();
        gw.expect_resource_exists().returning(move |path| {
            let store = recorded.lock().unwrap();
            Ok(match path {
                ROLE_PATH => store.role.is_some(),
                BINDING_PATH => store.binding.is_some(),
                other => panic!("unexpected request {}", other),
            })
        });

        gw.expect_request().returning(move |method, path, body| {
            let mut store = store.lock().unwrap();
            store.mutations.push((method.clone(), path.to_string()));
            let body = body.unwrap_or_default();
            if path.contains("/roles") {
                store.role = Some(body.clone());
            } else {
                store.binding = Some(body.clone());
            }
            Ok(body)
        });
        gw
    }

    #[test]
    fn canonical_role_has_fixed_rules() {
        let role = canonical_role("shop");
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 3);

        assert_eq!(rules[0].api_groups, Some(vec!["apps".to_string()]));
        assert_eq!(rules[0].resources, Some(vec!["deployments".to_string()]));
        assert_eq!(rules[0].verbs, DEPLOYMENT_VERBS.map(String::from).to_vec());

        assert_eq!(rules[1].resources, Some(vec!["deployments/scale".to_string()]));
        assert_eq!(rules[1].verbs, DEPLOYMENT_VERBS.map(String::from).to_vec());

        assert_eq!(rules[2].api_groups, Some(vec![String::new()]));
        assert_eq!(rules[2].resources, Some(vec!["pods".to_string()]));
        assert_eq!(rules[2].verbs, POD_VERBS.map(String::from).to_vec());
    }

    #[test]
    fn canonical_binding_targets_service_account() {
        let binding = canonical_binding("shop", "porygon-bot");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, "porygon-bot");
        assert_eq!(subject.namespace.as_deref(), Some("shop"));
        assert_eq!(binding.role_ref.kind, "Role");
        assert_eq!(binding.role_ref.name, ROLE_NAME);
    }

    /// Story: reconciling twice leaves the canonical Role and a single binding
    #[tokio::test]
    async fn story_ensure_grant_twice_converges() {
        let store = Arc::new(Mutex::new(Store::default()));
        let manager = PermissionManager::new(Arc::new(stateful_gateway(store.clone())));

        manager.ensure_grant("shop", "porygon-bot").await.unwrap();
        manager.ensure_grant("shop", "porygon-bot").await.unwrap();

        let store = store.lock().unwrap();
        let expected = serde_json::to_value(canonical_role("shop")).unwrap();
        assert_eq!(store.role.as_ref(), Some(&expected));

        let binding_posts = store
            .mutations
            .iter()
            .filter(|(m, p)| *m == Method::POST && p.contains("rolebindings"))
            .count();
        assert_eq!(binding_posts, 1);

        let methods: Vec<_> = store.mutations.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(methods, vec![Method::POST, Method::POST, Method::PUT]);
    }

    /// Story: an operator widened the Role by hand; the next reconcile reverts it
    #[tokio::test]
    async fn story_drifted_role_is_overwritten() {
        let store = Arc::new(Mutex::new(Store {
            role: Some(serde_json::json!({
                "metadata": {"name": ROLE_NAME},
                "rules": [{"apiGroups": ["*"], "resources": ["*"], "verbs": ["*"]}]
            })),
            binding: Some(serde_json::json!({"metadata": {"name": ROLE_BINDING_NAME}})),
            ..Default::default()
        }));
        let manager = PermissionManager::new(Arc::new(stateful_gateway(store.clone())));

        manager.ensure_grant("shop", "porygon-bot").await.unwrap();

        let store = store.lock().unwrap();
        let expected = serde_json::to_value(canonical_role("shop")).unwrap();
        assert_eq!(store.role.as_ref(), Some(&expected));
        assert_eq!(store.mutations, vec![(Method::PUT, ROLE_PATH.to_string())]);
    }

    #[tokio::test]
    async fn existing_binding_is_never_modified() {
        let mut gw = MockClusterGateway::new();
        gw.expect_resource_exists().returning(|_| Ok(true));
        gw.expect_request()
            .withf(|method, path, _| *method == Method::PUT && path == ROLE_PATH)
            .times(1)
            .returning(|_, _, _| Ok(Value::Null));

        let manager = PermissionManager::new(Arc::new(gw));
        manager.ensure_grant("shop", "porygon-bot").await.unwrap();
    }

    #[tokio::test]
    async fn role_is_reconciled_before_binding() {
        let mut seq = Sequence::new();
        let mut gw = MockClusterGateway::new();

        gw.expect_resource_exists()
            .withf(|p| p == ROLE_PATH)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(false));
        gw.expect_request()
            .withf(|_, p, _| p.ends_with("/roles"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(Value::Null));
        gw.expect_resource_exists()
            .withf(|p| p == BINDING_PATH)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(false));
        gw.expect_request()
            .withf(|_, p, _| p.ends_with("/rolebindings"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(Value::Null));

        let manager = PermissionManager::new(Arc::new(gw));
        manager.ensure_grant("shop", "porygon-bot").await.unwrap();
    }

    #[tokio::test]
    async fn role_failure_skips_binding() {
        let mut gw = MockClusterGateway::new();
        gw.expect_resource_exists()
            .withf(|p| p == ROLE_PATH)
            .returning(|_| Ok(false));
        gw.expect_request()
            .returning(|_, p, _| Err(Error::upstream(p, 403, "Forbidden", "")));

        let manager = PermissionManager::new(Arc::new(gw));
        let err = manager.ensure_grant("shop", "porygon-bot").await.unwrap_err();
        assert_eq!(err.status(), Some(403));
    }
}
