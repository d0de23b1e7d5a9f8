//! Router and shared handler state

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::handlers;
use crate::supervisor::TaskSupervisor;
use crate::ws::progress_handler;
use porygon_cluster::ClusterConnector;
use porygon_sync::{BatchOptions, BatchSequencer, ProgressBroadcaster, SyncOptions, SyncOrchestrator};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Builds a gateway for the credential carried by each request
    pub connector: Arc<dyn ClusterConnector>,
    /// Single deployment syncs
    pub orchestrator: SyncOrchestrator,
    /// Batch syncs
    pub sequencer: BatchSequencer,
    /// Owner of background batch tasks
    pub supervisor: TaskSupervisor,
}

impl AppState {
    /// Wire the sync services around one broadcaster
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        sync_options: SyncOptions,
        batch_options: BatchOptions,
        supervisor: TaskSupervisor,
    ) -> Self {
        let orchestrator =
            SyncOrchestrator::new(connector.clone(), ProgressBroadcaster::new(), sync_options);
        let sequencer = BatchSequencer::new(orchestrator.clone(), batch_options);
        Self {
            connector,
            orchestrator,
            sequencer,
            supervisor,
        }
    }

    /// Broadcaster every sync publishes on
    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        self.orchestrator.broadcaster()
    }
}

/// All routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/ws", get(progress_handler))
        .route("/access/setup", post(handlers::setup_access))
        .route("/access/check", post(handlers::check_access))
        .route("/services", post(handlers::list_services))
        .route("/services/versions", post(handlers::service_versions))
        .route("/services/sync", post(handlers::sync_service))
        .route("/services/multiple-sync", post(handlers::multiple_sync))
        .route("/services/scale", post(handlers::scale_service))
        .route("/pods", post(handlers::list_pods))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Starting porygon server");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
