//! Deployment inspection and patching

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use kube::ResourceExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::gateway::ClusterGateway;
use crate::ItemList;
use porygon_common::image::extract_tag;
use porygon_common::{validate_name, validate_namespace, Error, UNKNOWN_VERSION};

/// Labels consulted for the application group, most specific first
const APP_GROUP_LABELS: [&str; 3] = [
    "app.kubernetes.io/part-of",
    "app.kubernetes.io/name",
    "app",
];

fn deployments_path(namespace: &str) -> String {
    format!("/apis/apps/v1/namespaces/{}/deployments", namespace)
}

fn deployment_path(namespace: &str, name: &str) -> String {
    format!("{}/{}", deployments_path(namespace), name)
}

/// What a deployment is currently running, as reported to observers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadFact {
    /// Deployment name
    pub name: String,
    /// Tag of the first container image, or `"unknown"` without one
    pub version: String,
    /// Ready replicas, else available replicas, else 0
    #[serde(rename = "podCount")]
    pub ready_replicas: i32,
    /// Application the deployment belongs to
    pub app_group: String,
}

impl WorkloadFact {
    /// Derive the fact for one deployment
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let name = deployment.name_any();

        let version = containers(deployment)
            .first()
            .and_then(|c| c.image.as_deref())
            .filter(|image| !image.is_empty())
            .map(|image| extract_tag(image).to_string())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        let ready_replicas = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas.or(s.available_replicas))
            .unwrap_or(0);

        let labels = deployment.labels();
        let app_group = APP_GROUP_LABELS
            .iter()
            .find_map(|key| labels.get(*key))
            .cloned()
            .unwrap_or_else(|| name.clone());

        Self {
            name,
            version,
            ready_replicas,
            app_group,
        }
    }
}

/// Containers of the deployment's pod template
pub fn containers(deployment: &Deployment) -> &[Container] {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|s| s.containers.as_slice())
        .unwrap_or_default()
}

/// Position of the container called `name`
pub fn find_container_index(containers: &[Container], name: &str) -> Option<usize> {
    containers.iter().position(|c| c.name == name)
}

/// Reads and patches Deployments
pub struct DeploymentInspector {
    gateway: Arc<dyn ClusterGateway>,
}

impl DeploymentInspector {
    /// Create an inspector over a gateway
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// All deployments in the namespace
    pub async fn list(&self, namespace: &str) -> Result<Vec<Deployment>, Error> {
        validate_namespace("namespace", namespace)?;
        let value = self
            .gateway
            .request(Method::GET, &deployments_path(namespace), None)
            .await?;
        let list: ItemList<Deployment> = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind("DeploymentList", e.to_string()))?;
        Ok(list.items)
    }

    /// One deployment by name; a missing deployment is [`Error::NotFound`]
    pub async fn get(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        validate_namespace("namespace", namespace)?;
        validate_name("deploymentName", name)?;
        let value = self
            .gateway
            .request(Method::GET, &deployment_path(namespace, name), None)
            .await
            .map_err(|e| {
                if e.status() == Some(404) {
                    Error::not_found("Deployment", namespace, name)
                } else {
                    e
                }
            })?;
        serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind("Deployment", e.to_string()))
    }

    /// Names of all deployments in the namespace
    pub async fn list_names(&self, namespace: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .list(namespace)
            .await?
            .iter()
            .map(|d| d.name_any())
            .collect())
    }

    /// Facts for every deployment, keyed by name
    pub async fn list_facts(&self, namespace: &str) -> Result<BTreeMap<String, WorkloadFact>, Error> {
        let facts: BTreeMap<_, _> = self
            .list(namespace)
            .await?
            .iter()
            .map(WorkloadFact::from_deployment)
            .map(|fact| (fact.name.clone(), fact))
            .collect();
        debug!(namespace = %namespace, count = facts.len(), "derived workload facts");
        Ok(facts)
    }

    /// Replace the image of one container
    pub async fn patch_image(
        &self,
        namespace: &str,
        name: &str,
        container_index: usize,
        image: &str,
    ) -> Result<(), Error> {
        validate_namespace("namespace", namespace)?;
        validate_name("deploymentName", name)?;
        let patch = json!([{
            "op": "replace",
            "path": format!("/spec/template/spec/containers/{}/image", container_index),
            "value": image,
        }]);
        self.gateway
            .request(Method::PATCH, &deployment_path(namespace, name), Some(patch))
            .await?;
        info!(namespace = %namespace, deployment = %name, image = %image, "patched image");
        Ok(())
    }

    /// Set the desired replica count
    pub async fn patch_replicas(&self, namespace: &str, name: &str, replicas: i32) -> Result<(), Error> {
        validate_namespace("namespace", namespace)?;
        validate_name("deploymentName", name)?;
        let patch = json!([{ "op": "replace", "path": "/spec/replicas", "value": replicas }]);
        self.gateway
            .request(Method::PATCH, &deployment_path(namespace, name), Some(patch))
            .await?;
        info!(namespace = %namespace, deployment = %name, replicas, "patched replicas");
        Ok(())
    }
}
