//! Command line and environment configuration

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use porygon_cluster::GatewayOptions;
use porygon_common::telemetry::{LogFormat, TelemetryConfig};
use porygon_common::{DEFAULT_CLI_BINARY, DEFAULT_SYNC_PACING_SECS};
use porygon_sync::orchestrator::DEFAULT_CONVERGENCE_POLL;
use porygon_sync::{BatchOptions, ConvergenceOptions, SyncOptions};

/// Porygon - namespace access provisioning and deployment sync
#[derive(Parser, Debug, Clone)]
#[command(name = "porygon", version, about, long_about = None)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "PORYGON_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Cluster CLI used for login and token minting
    #[arg(long, env = "PORYGON_CLI_BINARY", default_value = DEFAULT_CLI_BINARY)]
    pub cli_binary: String,

    /// Pause after every item of a batch sync, in seconds
    #[arg(long, env = "PORYGON_SYNC_PACING_SECS", default_value_t = DEFAULT_SYNC_PACING_SECS)]
    pub sync_pacing_secs: u64,

    /// Timeout of a single cluster API call, in seconds
    #[arg(long, env = "PORYGON_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Timeout of a cluster CLI invocation, in seconds
    #[arg(long, env = "PORYGON_COMMAND_TIMEOUT_SECS", default_value_t = 60)]
    pub command_timeout_secs: u64,

    /// Wait this long for a synced deployment to converge; unset reports success once patches are accepted
    #[arg(long, env = "PORYGON_CONVERGENCE_TIMEOUT_SECS")]
    pub convergence_timeout_secs: Option<u64>,

    /// Interval between convergence checks, in seconds
    #[arg(long, env = "PORYGON_CONVERGENCE_POLL_SECS", default_value_t = DEFAULT_CONVERGENCE_POLL.as_secs())]
    pub convergence_poll_secs: u64,

    /// How long shutdown waits for running batch syncs, in seconds
    #[arg(long, env = "PORYGON_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Log output format (text or json)
    #[arg(long, env = "PORYGON_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Accept self-signed API server certificates
    #[arg(long, env = "PORYGON_INSECURE_SKIP_TLS_VERIFY")]
    pub insecure_skip_tls_verify: bool,

    /// OTLP collector endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Options for every cluster gateway
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            cli_binary: self.cli_binary.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
        }
    }

    /// Timeout of cluster CLI invocations
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Options for the orchestrator
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            convergence: self.convergence_timeout_secs.map(|secs| ConvergenceOptions {
                timeout: Duration::from_secs(secs),
                poll_interval: Duration::from_secs(self.convergence_poll_secs.max(1)),
            }),
        }
    }

    /// Options for the batch sequencer
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            pacing: Duration::from_secs(self.sync_pacing_secs),
        }
    }

    /// Grace period for background batches at shutdown
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Telemetry settings
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: "porygon-server".to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            log_format: self.log_format,
        }
    }
}
