//! Error types for Porygon
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the namespace, resource path or command that failed so a
//! log line can be correlated with the cluster call behind it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

fn field_message(field: &Option<String>, message: &str) -> String {
    match field {
        Some(field) => format!("{} {}", field, message),
        None => message.to_string(),
    }
}

/// Main error type for Porygon operations
#[derive(Debug, Error)]
pub enum Error {
    /// Request is malformed or missing fields; rejected before any mutation
    #[error("invalid request: {}", field_message(.field, .message))]
    InvalidRequest {
        /// Description of what's invalid
        message: String,
        /// The offending field (e.g., "desiredPodCount")
        field: Option<String>,
    },

    /// A resource the operation depends on does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (e.g., "Deployment")
        kind: String,
        /// Resource name
        name: String,
        /// Namespace the lookup ran in
        namespace: String,
    },

    /// The cluster API answered with a non-2xx status
    #[error("cluster API request to {path} failed: {status} {status_text} - {body}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase for the status
        status_text: String,
        /// Raw response body
        body: String,
        /// Request path that failed
        path: String,
    },

    /// The cluster API could not be reached or the response could not be read
    #[error("cluster API transport error for {path}: {message}")]
    Transport {
        /// Request path that failed
        path: String,
        /// Description of what failed
        message: String,
    },

    /// External cluster CLI invocation failed
    #[error("command `{command}` failed: {message}")]
    Command {
        /// Redacted command line
        command: String,
        /// stderr output or spawn failure
        message: String,
    },

    /// Access review said the identity may not perform the action
    #[error("permission denied: cannot {verb} {resource} in namespace {namespace}")]
    PermissionDenied {
        /// Namespace of the access review
        namespace: String,
        /// Resource of the access review
        resource: String,
        /// Verb of the access review
        verb: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "convergence", "supervisor")
        context: String,
    },
}

impl Error {
    /// Create an invalid-request error with the given message
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-request error naming the offending field
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error for a namespaced resource
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create an upstream error from a failed cluster API response
    pub fn upstream(
        path: impl Into<String>,
        status: u16,
        status_text: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            status,
            status_text: status_text.into(),
            body: body.into(),
            path: path.into(),
        }
    }

    /// Create a transport error for the given request path
    pub fn transport(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a command error
    pub fn command(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a permission-denied error
    pub fn permission_denied(
        namespace: impl Into<String>,
        resource: impl Into<String>,
        verb: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            namespace: namespace.into(),
            resource: resource.into(),
            verb: verb.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status of an upstream failure, if this is one
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error means the addressed resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. }) || self.status() == Some(404)
    }

    /// Whether the request was rejected by the caller's own input
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Error::InvalidRequest { .. })
    }

    /// Short human message suitable for a progress envelope
    ///
    /// Upstream failures carrying a Kubernetes `Status` body are reduced to the
    /// status message; everything else uses the full display form.
    pub fn summary(&self) -> String {
        match self {
            Error::Upstream { status, body, .. } => {
                match serde_json::from_str::<kube::core::ErrorResponse>(body) {
                    Ok(status_body) if !status_body.message.is_empty() => {
                        format!("{} ({})", status_body.message, status)
                    }
                    _ => self.to_string(),
                }
            }
            _ => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
