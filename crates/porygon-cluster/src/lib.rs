//! Cluster access for Porygon
//!
//! A thin [`ClusterGateway`](gateway::ClusterGateway) over the cluster REST
//! API and CLI, and the resource managers built on it: access reviews,
//! ServiceAccounts, RBAC, Deployments and Pods.

#![deny(missing_docs)]

pub mod access;
pub mod authorization;
pub mod command;
pub mod deployments;
pub mod gateway;
pub mod identity;
pub mod pods;
pub mod rbac;

use serde::Deserialize;

pub use access::AccessCoordinator;
pub use authorization::AuthorizationProbe;
pub use command::{CommandOutput, CommandRunner, PrivilegedCommand, ProcessCommandRunner};
pub use deployments::{find_container_index, DeploymentInspector, WorkloadFact};
pub use gateway::{ClusterConnector, ClusterGateway, GatewayOptions, HttpClusterGateway, HttpConnector};
pub use identity::IdentityManager;
pub use pods::PodInspector;
pub use rbac::PermissionManager;

/// Label marking objects created by Porygon
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on Porygon-created objects
pub const MANAGED_BY_PORYGON: &str = "porygon";

/// Items of a Kubernetes list response
#[derive(Deserialize)]
pub(crate) struct ItemList<T> {
    #[serde(default)]
    items: Vec<T>,
}
