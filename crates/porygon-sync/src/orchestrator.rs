//! Single deployment reconciliation
//!
//! A sync reads the deployment, retags the target container when the
//! version differs, patches the replica count when it differs, and
//! optionally waits for the rollout to report the desired state. Progress is
//! broadcast at every step. Cluster failures never escape [`SyncOrchestrator::sync_one`];
//! they end up in the returned [`SyncOutcome`] and the terminal
//! `SYNC_COMPLETE` envelope.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use crate::progress::{
    EventType, ProgressBroadcaster, ServiceSynced, StepKind, SyncComplete, SyncStarted, SyncStep,
};
use crate::request::{SyncOutcome, SyncRequest};
use porygon_cluster::deployments::containers;
use porygon_cluster::{find_container_index, ClusterConnector, DeploymentInspector, WorkloadFact};
use porygon_common::image::{extract_tag, replace_tag};
use porygon_common::Error;

/// Default interval between convergence checks
pub const DEFAULT_CONVERGENCE_POLL: Duration = Duration::from_secs(5);

/// How long to wait for a patched deployment to report the desired state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvergenceOptions {
    /// Give up after this long
    pub timeout: Duration,
    /// Delay between checks
    pub poll_interval: Duration,
}

/// Orchestrator tunables
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Wait for convergence after patching; `None` reports success once patches are accepted
    pub convergence: Option<ConvergenceOptions>,
}

/// Current state of the container a sync targets
struct Target {
    index: usize,
    image: String,
    version: String,
    ready_replicas: i32,
}

/// Brings one deployment to its desired version and replica count
#[derive(Clone)]
pub struct SyncOrchestrator {
    connector: Arc<dyn ClusterConnector>,
    broadcaster: ProgressBroadcaster,
    options: SyncOptions,
}

impl SyncOrchestrator {
    /// Create an orchestrator
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        broadcaster: ProgressBroadcaster,
        options: SyncOptions,
    ) -> Self {
        Self {
            connector,
            broadcaster,
            options,
        }
    }

    /// The broadcaster progress is published on
    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Reconcile one deployment and report the outcome
    ///
    /// An invalid request is reported as an error outcome without any cluster
    /// call and without `SYNC_STARTED`. Every other request emits
    /// `SYNC_STARTED` first. Both end with exactly one `SYNC_COMPLETE`.
    #[instrument(
        skip(self, request),
        fields(namespace = %request.namespace, service = %request.service_name)
    )]
    pub async fn sync_one(&self, request: &SyncRequest) -> SyncOutcome {
        if let Err(e) = request.validate() {
            warn!(error = %e, "rejecting invalid sync request");
            return self.complete(
                &request.namespace,
                SyncOutcome::error(&request.service_name, e.summary()),
            );
        }

        self.broadcaster.broadcast(
            EventType::SyncStarted,
            &SyncStarted {
                namespace: request.namespace.clone(),
                service_name: request.service_name.clone(),
                desired_version: request.desired_version.clone(),
                desired_pod_count: request.desired_pod_count,
            },
        );

        let outcome = match self.reconcile(request).await {
            Ok(()) => {
                info!(
                    version = %request.desired_version,
                    replicas = request.desired_pod_count,
                    "sync complete"
                );
                SyncOutcome::ok(&request.service_name)
            }
            Err(e) => {
                warn!(error = %e, "sync failed");
                SyncOutcome::error(&request.service_name, e.summary())
            }
        };

        self.complete(&request.namespace, outcome)
    }

    fn complete(&self, namespace: &str, outcome: SyncOutcome) -> SyncOutcome {
        self.broadcaster.broadcast(
            EventType::SyncComplete,
            &SyncComplete {
                namespace: namespace.to_string(),
                service_name: outcome.service_name.clone(),
                status: outcome.status,
                error: outcome.error.clone(),
            },
        );
        outcome
    }

    fn step(&self, request: &SyncRequest, step: StepKind, message: String) {
        debug!(step = ?step, message = %message, "sync step");
        self.broadcaster.broadcast(
            EventType::SyncStep,
            &SyncStep {
                namespace: request.namespace.clone(),
                service_name: request.service_name.clone(),
                step,
                message,
            },
        );
    }

    async fn reconcile(&self, request: &SyncRequest) -> Result<(), Error> {
        let inspector = DeploymentInspector::new(self.connector.connect(&request.credential));
        let namespace = request.namespace.as_str();
        let name = request.service_name.as_str();
        let desired_replicas = request.desired_replicas();

        let target = self.read_target(&inspector, request).await?;

        if target.version != request.desired_version {
            let image = replace_tag(&target.image, &request.desired_version);
            self.step(
                request,
                StepKind::UpdateImage,
                format!("Updating image from {} to {}", target.image, image),
            );
            inspector
                .patch_image(namespace, name, target.index, &image)
                .await?;
        }

        if target.ready_replicas != desired_replicas {
            self.step(
                request,
                StepKind::Scale,
                format!(
                    "Scaling from {} to {} replicas",
                    target.ready_replicas, desired_replicas
                ),
            );
            inspector
                .patch_replicas(namespace, name, desired_replicas)
                .await?;
        }

        if let Some(convergence) = self.options.convergence {
            self.await_convergence(&inspector, request, convergence).await?;
        }
        Ok(())
    }

    async fn read_target(
        &self,
        inspector: &DeploymentInspector,
        request: &SyncRequest,
    ) -> Result<Target, Error> {
        let deployment = inspector
            .get(&request.namespace, &request.service_name)
            .await?;
        let containers = containers(&deployment);

        let index = match &request.container {
            Some(container) => find_container_index(containers, container).ok_or_else(|| {
                Error::not_found("Container", &request.namespace, container)
            })?,
            None => 0,
        };

        let image = containers
            .get(index)
            .and_then(|c| c.image.clone())
            .filter(|image| !image.is_empty())
            .ok_or_else(|| {
                Error::invalid_request(format!(
                    "deployment {} has no container image to update",
                    request.service_name
                ))
            })?;

        Ok(Target {
            index,
            version: extract_tag(&image).to_string(),
            image,
            ready_replicas: WorkloadFact::from_deployment(&deployment).ready_replicas,
        })
    }

    /// Poll until the target container runs the desired tag with the desired ready replicas
    async fn await_convergence(
        &self,
        inspector: &DeploymentInspector,
        request: &SyncRequest,
        convergence: ConvergenceOptions,
    ) -> Result<(), Error> {
        let desired_replicas = request.desired_replicas();
        self.step(
            request,
            StepKind::AwaitConvergence,
            format!(
                "Waiting up to {}s for {} ready replicas on {}",
                convergence.timeout.as_secs(),
                desired_replicas,
                request.desired_version
            ),
        );

        let start = tokio::time::Instant::now();
        loop {
            match self.read_target(inspector, request).await {
                Ok(target)
                    if target.version == request.desired_version
                        && target.ready_replicas == desired_replicas =>
                {
                    self.broadcaster.broadcast(
                        EventType::ServiceSynced,
                        &ServiceSynced {
                            namespace: request.namespace.clone(),
                            service_name: request.service_name.clone(),
                            version: target.version,
                            pod_count: target.ready_replicas,
                        },
                    );
                    return Ok(());
                }
                Ok(target) => trace!(
                    version = %target.version,
                    ready = target.ready_replicas,
                    "not converged yet"
                ),
                Err(e) => trace!(error = %e, "convergence check failed, retrying"),
            }

            if start.elapsed() >= convergence.timeout {
                return Err(Error::internal_with_context(
                    "await_convergence",
                    format!(
                        "{} did not reach {} with {} ready replicas within {}s",
                        request.service_name,
                        request.desired_version,
                        desired_replicas,
                        convergence.timeout.as_secs()
                    ),
                ));
            }
            tokio::time::sleep(convergence.poll_interval).await;
        }
    }
}
