//! Logging and trace export
//!
//! Porygon logs through `tracing`. Lines go to stdout as text or JSON, and
//! spans are additionally shipped over OTLP when a collector endpoint is set.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,porygon=debug,hyper=warn,reqwest=warn,tower=warn";

/// Telemetry setup failure
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP span exporter could not be built
    #[error("failed to build OTLP exporter for {endpoint}: {message}")]
    Exporter {
        /// Collector endpoint
        endpoint: String,
        /// Underlying error
        message: String,
    },

    /// A global subscriber is already installed
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Output format of log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// One JSON object per line, with the current span
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}', expected text or json", other)),
        }
    }
}

/// How the process reports logs and spans
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` of exported spans
    pub service_name: String,
    /// OTLP gRPC collector, e.g. `http://otel-collector:4317`; `None` keeps spans local
    pub otlp_endpoint: Option<String>,
    /// Log line format
    pub log_format: LogFormat,
}

impl TelemetryConfig {
    /// Text logs, no export
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            otlp_endpoint: None,
            log_format: LogFormat::Text,
        }
    }
}

/// Owns the span exporter installed by [`init_telemetry`]
///
/// Call [`shutdown`](Self::shutdown) before the process exits so spans still
/// buffered in the batch exporter are flushed.
#[derive(Default)]
#[must_use]
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }

    /// Flush buffered spans and stop the exporter
    ///
    /// Blocks until the exporter finishes; call from a blocking context.
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                warn!(error = %e, "failed to flush spans on shutdown");
            }
        }
    }
}

/// Install the global subscriber
///
/// Call once. With an OTLP endpoint this must run inside a tokio runtime,
/// which drives the batch span exporter.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let mut guard = TelemetryGuard::default();
    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            global::set_text_map_propagator(TraceContextPropagator::new());
            let provider = span_pipeline(endpoint, service_resource(&config.service_name))?;
            let tracer = provider.tracer(config.service_name.clone());
            global::set_tracer_provider(provider.clone());
            guard.provider = Some(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(log_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(guard)
}

fn service_resource(service_name: &str) -> Resource {
    Resource::new([
        KeyValue::new(SERVICE_NAME, service_name.to_string()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ])
}

fn span_pipeline(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build())
}
