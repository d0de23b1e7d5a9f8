//! ServiceAccount management

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use reqwest::Method;
use tracing::info;

use crate::command::PrivilegedCommand;
use crate::gateway::ClusterGateway;
use crate::{LABEL_MANAGED_BY, MANAGED_BY_PORYGON};
use porygon_common::{validate_name, validate_namespace, Error};

/// Collection path for ServiceAccounts in a namespace
pub fn service_accounts_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{}/serviceaccounts", namespace)
}

/// Path of one ServiceAccount
pub fn service_account_path(namespace: &str, name: &str) -> String {
    format!("{}/{}", service_accounts_path(namespace), name)
}

/// Ensures automation ServiceAccounts exist and mints their tokens
pub struct IdentityManager {
    gateway: Arc<dyn ClusterGateway>,
}

impl IdentityManager {
    /// Create a manager over a gateway
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// Whether the ServiceAccount exists
    pub async fn exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        validate_namespace("namespace", namespace)?;
        validate_name("serviceAccountName", name)?;
        self.gateway
            .resource_exists(&service_account_path(namespace, name))
            .await
    }

    /// Create the ServiceAccount unless it already exists
    ///
    /// An existing account is left untouched; no mutating request is issued.
    pub async fn ensure_exists(&self, namespace: &str, name: &str) -> Result<(), Error> {
        if self.exists(namespace, name).await? {
            info!(namespace = %namespace, service_account = %name, "ServiceAccount already exists");
            return Ok(());
        }

        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    MANAGED_BY_PORYGON.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        self.gateway
            .request(
                Method::POST,
                &service_accounts_path(namespace),
                Some(serde_json::to_value(&account)?),
            )
            .await?;

        info!(namespace = %namespace, service_account = %name, "created ServiceAccount");
        Ok(())
    }

    /// Mint a fresh short-lived token for the ServiceAccount
    ///
    /// Not idempotent: every call produces a new token.
    pub async fn mint_token(&self, namespace: &str, name: &str) -> Result<String, Error> {
        validate_namespace("namespace", namespace)?;
        validate_name("serviceAccountName", name)?;
        let token = self
            .gateway
            .run_privileged_command(&PrivilegedCommand::CreateToken {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
            .await?;

        if token.is_empty() {
            return Err(Error::command(
                format!("create token {} -n {}", name, namespace),
                "command produced an empty token",
            ));
        }

        info!(namespace = %namespace, service_account = %name, "minted ServiceAccount token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockClusterGateway;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Gateway whose ServiceAccount springs into existence once POSTed
    fn stateful_gateway(creates: Arc<AtomicUsize>) -> MockClusterGateway {
        let created = Arc::new(AtomicBool::new(false));
        let mut gw = MockClusterGateway::new();

        let exists_state = created.clone();
        gw.expect_resource_exists()
            .withf(|path| path == "/api/v1/namespaces/shop/serviceaccounts/porygon-bot")
            .returning(move |_| Ok(exists_state.load(Ordering::SeqCst)));

        gw.expect_request()
            .withf(|method, path, _| {
                *method == Method::POST && path == "/api/v1/namespaces/shop/serviceaccounts"
            })
            .returning(move |_, _, body| {
                creates.fetch_add(1, Ordering::SeqCst);
                created.store(true, Ordering::SeqCst);
                Ok(body.unwrap_or_default())
            });
        gw
    }

    /// Story: onboarding the same namespace twice creates the account once
    #[tokio::test]
    async fn story_ensure_exists_is_idempotent() {
        let creates = Arc::new(AtomicUsize::new(0));
        let manager = IdentityManager::new(Arc::new(stateful_gateway(creates.clone())));

        manager.ensure_exists("shop", "porygon-bot").await.unwrap();
        manager.ensure_exists("shop", "porygon-bot").await.unwrap();

        assert_eq!(creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn existing_account_issues_no_mutation() {
        let mut gw = MockClusterGateway::new();
        gw.expect_resource_exists().returning(|_| Ok(true));
        gw.expect_request().never();

        let manager = IdentityManager::new(Arc::new(gw));
        manager.ensure_exists("shop", "porygon-bot").await.unwrap();
    }

    #[tokio::test]
    async fn created_account_carries_name_and_label() {
        let mut gw = MockClusterGateway::new();
        gw.expect_resource_exists().returning(|_| Ok(false));
        gw.expect_request()
            .withf(|_, _, body| {
                let body = body.as_ref().unwrap();
                body["kind"] == "ServiceAccount"
                    && body["metadata"]["name"] == "porygon-bot"
                    && body["metadata"]["labels"][LABEL_MANAGED_BY] == MANAGED_BY_PORYGON
            })
            .times(1)
            .returning(|_, _, _| Ok(serde_json::Value::Null));

        let manager = IdentityManager::new(Arc::new(gw));
        manager.ensure_exists("shop", "porygon-bot").await.unwrap();
    }

    #[tokio::test]
    async fn existence_check_failure_propagates() {
        let mut gw = MockClusterGateway::new();
        gw.expect_resource_exists()
            .returning(|p| Err(Error::upstream(p, 500, "Internal Server Error", "")));
        gw.expect_request().never();

        let manager = IdentityManager::new(Arc::new(gw));
        let err = manager.ensure_exists("shop", "porygon-bot").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn mint_token_always_runs_the_command() {
        let mut gw = MockClusterGateway::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        gw.expect_run_privileged_command()
            .withf(|cmd| {
                *cmd == PrivilegedCommand::CreateToken {
                    namespace: "shop".to_string(),
                    name: "porygon-bot".to_string(),
                }
            })
            .times(2)
            .returning(move |_| {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                Ok(format!("token-{}", n))
            });

        let manager = IdentityManager::new(Arc::new(gw));
        let first = manager.mint_token("shop", "porygon-bot").await.unwrap();
        let second = manager.mint_token("shop", "porygon-bot").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_token_is_an_error() {
        let mut gw = MockClusterGateway::new();
        gw.expect_run_privileged_command()
            .returning(|_| Ok(String::new()));

        let manager = IdentityManager::new(Arc::new(gw));
        assert!(manager.mint_token("shop", "porygon-bot").await.is_err());
    }

    #[tokio::test]
    async fn traversal_in_account_name_never_reaches_the_cluster() {
        let mut gw = MockClusterGateway::new();
        gw.expect_resource_exists().never();
        gw.expect_request().never();
        gw.expect_run_privileged_command().never();
        let manager = IdentityManager::new(Arc::new(gw));

        let err = manager
            .ensure_exists("shop", "../../kube-system/serviceaccounts/default")
            .await
            .unwrap_err();
        assert!(err.is_invalid_request());

        let err = manager.mint_token("shop", "-n").await.unwrap_err();
        assert!(err.is_invalid_request());
    }
}
