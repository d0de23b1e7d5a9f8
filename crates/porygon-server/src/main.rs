//! Porygon - namespace access provisioning and deployment sync server

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use porygon_cluster::{HttpConnector, ProcessCommandRunner};
use porygon_common::telemetry::init_telemetry;
use porygon_server::{serve, AppState, Config, TaskSupervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let telemetry = init_telemetry(config.telemetry())?;

    let commands = Arc::new(ProcessCommandRunner::new(config.command_timeout()));
    let connector = Arc::new(HttpConnector::new(&config.gateway_options(), commands)?);

    let supervisor = TaskSupervisor::new();
    let state = AppState::new(
        connector,
        config.sync_options(),
        config.batch_options(),
        supervisor.clone(),
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    // Cancelling the token closes open progress streams so graceful shutdown can finish
    let token = supervisor.shutdown_token();
    serve(listener, state, async move {
        shutdown_signal().await;
        token.cancel();
    })
    .await
    .context("server error")?;

    if supervisor.shutdown(config.shutdown_grace()).await {
        info!("Shutdown complete");
    }

    if telemetry.is_exporting() {
        tokio::task::spawn_blocking(move || telemetry.shutdown())
            .await
            .context("span exporter shutdown panicked")?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
