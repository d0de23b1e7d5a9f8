//! Pod listing

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use reqwest::Method;
use tracing::debug;

use crate::gateway::ClusterGateway;
use crate::ItemList;
use porygon_common::{validate_namespace, Error};

/// Reads Pods
pub struct PodInspector {
    gateway: Arc<dyn ClusterGateway>,
}

impl PodInspector {
    /// Create an inspector over a gateway
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// All pods in the namespace
    pub async fn list(&self, namespace: &str) -> Result<Vec<Pod>, Error> {
        validate_namespace("namespace", namespace)?;
        let path = format!("/api/v1/namespaces/{}/pods", namespace);
        let value = self.gateway.request(Method::GET, &path, None).await?;
        let list: ItemList<Pod> = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind("PodList", e.to_string()))?;
        debug!(namespace = %namespace, count = list.items.len(), "listed pods");
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockClusterGateway;
    use kube::ResourceExt;
    use serde_json::json;

    #[tokio::test]
    async fn list_returns_items() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .withf(|m, p, _| *m == Method::GET && p == "/api/v1/namespaces/shop/pods")
            .returning(|_, _, _| {
                Ok(json!({
                    "kind": "PodList",
                    "items": [
                        { "metadata": { "name": "cart-7d9f-abc" }, "status": { "phase": "Running" } },
                        { "metadata": { "name": "cart-7d9f-def" }, "status": { "phase": "Pending" } }
                    ]
                }))
            });

        let pods = PodInspector::new(Arc::new(gw)).list("shop").await.unwrap();
        let names: Vec<_> = pods.iter().map(|p| p.name_any()).collect();
        assert_eq!(names, vec!["cart-7d9f-abc", "cart-7d9f-def"]);
    }

    #[tokio::test]
    async fn missing_items_is_empty() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .returning(|_, _, _| Ok(json!({ "kind": "PodList" })));

        let pods = PodInspector::new(Arc::new(gw)).list("shop").await.unwrap();
        assert!(pods.is_empty());
    }

    #[tokio::test]
    async fn forbidden_propagates() {
        let mut gw = MockClusterGateway::new();
        gw.expect_request()
            .returning(|_, p, _| Err(Error::upstream(p, 403, "Forbidden", "")));

        let err = PodInspector::new(Arc::new(gw)).list("shop").await.unwrap_err();
        assert_eq!(err.status(), Some(403));
    }
}
