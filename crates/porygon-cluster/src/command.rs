//! External cluster CLI invocation
//!
//! Operator login and ServiceAccount token minting have no stable REST
//! equivalent across OpenShift versions, so they go through the cluster CLI.
//! Commands are built as argument vectors and never pass through a shell.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use porygon_common::{ClusterCredential, Error};

/// The privileged operations the gateway may run through the cluster CLI
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrivilegedCommand {
    /// Log the CLI in with the gateway's own credential
    Login,
    /// Mint a short-lived token for a ServiceAccount
    ///
    /// Runs with the gateway's own token and server rather than the CLI's
    /// current login session, which is shared by every request in the process.
    CreateToken {
        /// Namespace of the ServiceAccount
        namespace: String,
        /// ServiceAccount name
        name: String,
    },
}

impl PrivilegedCommand {
    /// Arguments for the CLI binary, filled in from the credential
    pub fn args(&self, credential: &ClusterCredential) -> Vec<String> {
        match self {
            PrivilegedCommand::Login => vec![
                "login".to_string(),
                format!("--token={}", credential.bearer_token),
                format!("--server={}", credential.cluster_endpoint),
            ],
            PrivilegedCommand::CreateToken { namespace, name } => vec![
                "create".to_string(),
                "token".to_string(),
                name.clone(),
                "-n".to_string(),
                namespace.clone(),
                format!("--token={}", credential.bearer_token),
                format!("--server={}", credential.cluster_endpoint),
            ],
        }
    }

    /// Command line safe to log: the operator token is masked
    pub fn redacted(&self, binary: &str, credential: &ClusterCredential) -> String {
        let token_arg = format!("--token={}", credential.bearer_token);
        let args: Vec<String> = self
            .args(credential)
            .into_iter()
            .map(|arg| {
                if arg == token_arg {
                    "--token=<redacted>".to_string()
                } else {
                    arg
                }
            })
            .collect();
        format!("{} {}", binary, args.join(" "))
    }
}

/// Captured result of a finished process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status 0
    pub success: bool,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

/// Runs an external program and captures its output
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error>;
}

/// [`CommandRunner`] backed by `tokio::process`
pub struct ProcessCommandRunner {
    timeout: Duration,
}

impl ProcessCommandRunner {
    /// Create a runner that kills commands exceeding `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error> {
        debug!(program = %program, argc = args.len(), "running cluster CLI");

        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                Error::command(
                    program,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| Error::command(program, format!("failed to spawn: {}", e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
