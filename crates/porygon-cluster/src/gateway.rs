//! Cluster API gateway
//!
//! Every resource manager talks to the cluster through the [`ClusterGateway`]
//! capability trait: a JSON request/response call, an existence check, and
//! the privileged CLI escape hatch. Production code uses
//! [`HttpClusterGateway`]; tests mock the trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::command::{CommandRunner, PrivilegedCommand};
use porygon_common::{ClusterCredential, Error, DEFAULT_CLI_BINARY};

/// Content type for regular JSON bodies
const JSON: &str = "application/json";

/// Content type for RFC 6902 patches
const JSON_PATCH: &str = "application/json-patch+json";

/// Capabilities every resource manager needs from the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Send a request and decode the JSON response
    ///
    /// Fails with [`Error::Upstream`] on any non-2xx status. PATCH bodies are
    /// sent as JSON patches.
    async fn request(&self, method: Method, path: &str, body: Option<Value>)
        -> Result<Value, Error>;

    /// Check whether the resource at `path` exists
    ///
    /// 2xx is `true` and 404 is `false`; any other status is an error.
    async fn resource_exists(&self, path: &str) -> Result<bool, Error>;

    /// Run a privileged cluster CLI command and return its trimmed stdout
    async fn run_privileged_command(&self, command: &PrivilegedCommand) -> Result<String, Error>;
}

/// Builds gateways for arbitrary credentials
///
/// Sync requests carry their own credential, so the orchestrator asks a
/// connector for a gateway per request instead of holding one.
pub trait ClusterConnector: Send + Sync {
    /// Gateway authenticated with `credential`
    fn connect(&self, credential: &ClusterCredential) -> Arc<dyn ClusterGateway>;
}

/// Tunables shared by every gateway a connector builds
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    /// Cluster CLI binary for privileged commands
    pub cli_binary: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Accept self-signed API server certificates
    pub insecure_skip_tls_verify: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            cli_binary: DEFAULT_CLI_BINARY.to_string(),
            request_timeout: Duration::from_secs(30),
            insecure_skip_tls_verify: false,
        }
    }
}

/// [`ClusterGateway`] speaking HTTPS to the API server with a bearer token
pub struct HttpClusterGateway {
    credential: ClusterCredential,
    http: reqwest::Client,
    commands: Arc<dyn CommandRunner>,
    cli_binary: String,
}

impl HttpClusterGateway {
    /// Create a gateway for one credential
    pub fn new(
        credential: ClusterCredential,
        http: reqwest::Client,
        commands: Arc<dyn CommandRunner>,
        cli_binary: impl Into<String>,
    ) -> Self {
        Self {
            credential,
            http,
            commands,
            cli_binary: cli_binary.into(),
        }
    }

    fn builder(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let content_type = if method == Method::PATCH { JSON_PATCH } else { JSON };
        self.http
            .request(method, self.credential.url_for(path))
            .bearer_auth(&self.credential.bearer_token)
            .header(CONTENT_TYPE, content_type)
    }
}

/// Read a failed response into an [`Error::Upstream`]
async fn upstream_error(path: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::upstream(
        path,
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        body,
    )
}

#[async_trait]
impl ClusterGateway for HttpClusterGateway {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, Error> {
        debug!(method = %method, path = %path, "cluster API request");

        let mut builder = self.builder(method, path);
        if let Some(body) = body {
            builder = builder.body(serde_json::to_vec(&body)?);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(path, e.to_string()))?;

        if !response.status().is_success() {
            return Err(upstream_error(path, response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transport(path, e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn resource_exists(&self, path: &str) -> Result<bool, Error> {
        let response = self
            .builder(Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::transport(path, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(path = %path, "resource not found");
            return Ok(false);
        }
        Err(upstream_error(path, response).await)
    }

    async fn run_privileged_command(&self, command: &PrivilegedCommand) -> Result<String, Error> {
        let redacted = command.redacted(&self.cli_binary, &self.credential);
        let output = self
            .commands
            .run(&self.cli_binary, &command.args(&self.credential))
            .await?;

        let stdout = output.stdout.trim();
        let stderr = output.stderr.trim();

        if !output.success || (stdout.is_empty() && !stderr.is_empty()) {
            let message = if stderr.is_empty() {
                "command exited with a failure status".to_string()
            } else {
                stderr.to_string()
            };
            warn!(command = %redacted, error = %message, "cluster CLI command failed");
            return Err(Error::command(redacted, message));
        }

        Ok(stdout.to_string())
    }
}

/// [`ClusterConnector`] producing [`HttpClusterGateway`]s over a shared client
#[derive(Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    commands: Arc<dyn CommandRunner>,
    cli_binary: String,
}

impl HttpConnector {
    /// Build the shared HTTP client from the options
    pub fn new(options: &GatewayOptions, commands: Arc<dyn CommandRunner>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(options.insecure_skip_tls_verify)
            .build()
            .map_err(|e| {
                Error::internal_with_context("gateway", format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            commands,
            cli_binary: options.cli_binary.clone(),
        })
    }
}

impl ClusterConnector for HttpConnector {
    fn connect(&self, credential: &ClusterCredential) -> Arc<dyn ClusterGateway> {
        Arc::new(HttpClusterGateway::new(
            credential.clone(),
            self.http.clone(),
            self.commands.clone(),
            self.cli_binary.clone(),
        ))
    }
}
