//! JSON handlers
//!
//! Each handler takes the caller's credential from the body, builds a
//! gateway for it and delegates to the cluster or sync layer. Required
//! fields that are absent or blank are rejected with 400 before any cluster
//! call.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::server::AppState;
use porygon_cluster::{
    AccessCoordinator, AuthorizationProbe, DeploymentInspector, PodInspector, WorkloadFact,
};
use porygon_common::ClusterCredential;
use porygon_sync::SyncRequest;

type Body<T> = std::result::Result<Json<T>, JsonRejection>;

fn required(value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(Error::missing_fields)
}

fn credential(cluster_url: Option<String>, token: Option<String>) -> Result<ClusterCredential> {
    Ok(ClusterCredential::new(required(cluster_url)?, required(token)?))
}

/// Body of `POST /access/setup`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupAccessBody {
    namespace: Option<String>,
    service_account_name: Option<String>,
    user_token: Option<String>,
    cluster_url: Option<String>,
}

/// Provision the automation ServiceAccount and return its token
pub async fn setup_access(
    State(state): State<AppState>,
    body: Body<SetupAccessBody>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let namespace = required(body.namespace)?;
    let service_account = required(body.service_account_name)?;
    let operator = credential(body.cluster_url, body.user_token)?;

    let coordinator = AccessCoordinator::new(
        state.connector.connect(&operator),
        operator.cluster_endpoint.clone(),
    );
    let scoped = coordinator.setup_access(&namespace, &service_account).await?;

    Ok(Json(json!({
        "saToken": scoped.bearer_token,
        "clusterUrl": scoped.cluster_endpoint,
    })))
}

/// Body of `POST /access/check`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAccessBody {
    namespace: Option<String>,
    resource: Option<String>,
    verb: Option<String>,
    sa_token: Option<String>,
    cluster_url: Option<String>,
}

/// Ask whether the token may perform a verb on a resource
pub async fn check_access(
    State(state): State<AppState>,
    body: Body<CheckAccessBody>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let namespace = required(body.namespace)?;
    let resource = required(body.resource)?;
    let verb = required(body.verb)?;
    let credential = credential(body.cluster_url, body.sa_token)?;

    let allowed = AuthorizationProbe::new(state.connector.connect(&credential))
        .check_permission(&namespace, &resource, &verb)
        .await?;
    Ok(Json(json!({ "allowed": allowed })))
}

/// Body of the namespace listing endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceBody {
    namespace: Option<String>,
    user_token: Option<String>,
    sa_token: Option<String>,
    cluster_url: Option<String>,
}

impl NamespaceBody {
    /// Namespace and credential; either token field is accepted
    fn into_parts(self) -> Result<(String, ClusterCredential)> {
        let namespace = required(self.namespace)?;
        let token = self.user_token.or(self.sa_token);
        Ok((namespace, credential(self.cluster_url, token)?))
    }
}

/// Names of the namespace's deployments
pub async fn list_services(
    State(state): State<AppState>,
    body: Body<NamespaceBody>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let (namespace, credential) = body.into_parts()?;

    let names = DeploymentInspector::new(state.connector.connect(&credential))
        .list_names(&namespace)
        .await?;
    Ok(Json(json!({ "deploymentNames": names })))
}

/// Running version, ready replicas and application group per deployment
pub async fn service_versions(
    State(state): State<AppState>,
    body: Body<NamespaceBody>,
) -> Result<Json<BTreeMap<String, WorkloadFact>>> {
    let Json(body) = body?;
    let (namespace, credential) = body.into_parts()?;

    let facts = DeploymentInspector::new(state.connector.connect(&credential))
        .list_facts(&namespace)
        .await?;
    Ok(Json(facts))
}

/// Pods of the namespace
pub async fn list_pods(
    State(state): State<AppState>,
    body: Body<NamespaceBody>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let (namespace, credential) = body.into_parts()?;

    let pods = PodInspector::new(state.connector.connect(&credential))
        .list(&namespace)
        .await?;
    Ok(Json(json!({ "pods": pods })))
}

/// Body of `POST /services/sync`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBody {
    namespace: Option<String>,
    service_name: Option<String>,
    desired_version: Option<String>,
    desired_pod_count: Option<i64>,
    container: Option<String>,
    sa_token: Option<String>,
    cluster_url: Option<String>,
}

/// Sync one deployment and wait for the outcome
pub async fn sync_service(
    State(state): State<AppState>,
    body: Body<SyncBody>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let request = SyncRequest {
        namespace: required(body.namespace)?,
        service_name: required(body.service_name)?,
        desired_version: required(body.desired_version)?,
        desired_pod_count: body.desired_pod_count.ok_or_else(Error::missing_fields)?,
        container: body.container,
        credential: credential(body.cluster_url, body.sa_token)?,
    };
    request.validate()?;

    let outcome = state.orchestrator.sync_one(&request).await;
    match outcome.error {
        None => Ok(Json(json!({
            "message": format!("Service {} synced successfully", outcome.service_name)
        }))),
        Some(error) => Err(Error::SyncFailed(error)),
    }
}

/// Body of `POST /services/multiple-sync`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipleSyncBody {
    namespace: Option<String>,
    services_data: Option<Vec<Value>>,
    sa_token: Option<String>,
    cluster_url: Option<String>,
}

/// Start a batch sync in the background; progress goes to the WebSocket
pub async fn multiple_sync(
    State(state): State<AppState>,
    body: Body<MultipleSyncBody>,
) -> Result<(StatusCode, Json<Value>)> {
    let Json(body) = body?;
    let namespace = required(body.namespace)?;
    let items = body.services_data.ok_or_else(Error::missing_fields)?;
    let credential = credential(body.cluster_url, body.sa_token)?;
    let total = items.len();

    let sequencer = state.sequencer.clone();
    state.supervisor.spawn("batch-sync", async move {
        sequencer.run_batch(&namespace, &credential, items).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Batch sync started", "total": total })),
    ))
}

/// Body of `POST /services/scale`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleBody {
    namespace: Option<String>,
    deployment_name: Option<String>,
    replicas: Option<i64>,
    user_token: Option<String>,
    cluster_url: Option<String>,
}

/// Set a deployment's replica count directly
pub async fn scale_service(
    State(state): State<AppState>,
    body: Body<ScaleBody>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let namespace = required(body.namespace)?;
    let name = required(body.deployment_name)?;
    let replicas = body.replicas.ok_or_else(Error::missing_fields)?;
    let replicas = i32::try_from(replicas)
        .ok()
        .filter(|r| *r >= 0)
        .ok_or_else(|| {
            porygon_common::Error::invalid_field("replicas", "must be a non-negative integer")
        })?;
    let credential = credential(body.cluster_url, body.user_token)?;

    DeploymentInspector::new(state.connector.connect(&credential))
        .patch_replicas(&namespace, &name, replicas)
        .await?;

    info!(namespace = %namespace, deployment = %name, replicas, "scaled deployment");
    Ok(Json(json!({
        "message": format!("Deployment {} scaled to {} replicas", name, replicas)
    })))
}
