//! HTTP error responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Result type for handlers
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by the HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request body missing, unparsable or incomplete
    #[error("{0}")]
    BadRequest(String),

    /// Failure from the cluster layer
    #[error(transparent)]
    Cluster(#[from] porygon_common::Error),

    /// A sync finished with an error outcome
    #[error("{0}")]
    SyncFailed(String),
}

impl Error {
    /// Standard rejection for absent required fields
    pub fn missing_fields() -> Self {
        Error::BadRequest("Missing required fields".to_string())
    }

    fn status(&self) -> StatusCode {
        use porygon_common::Error as Core;

        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::SyncFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Cluster(e) => match e {
                Core::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
                Core::NotFound { .. } => StatusCode::NOT_FOUND,
                Core::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                Core::Upstream { status, .. } => match *status {
                    401 => StatusCode::UNAUTHORIZED,
                    403 => StatusCode::FORBIDDEN,
                    404 => StatusCode::NOT_FOUND,
                    _ => StatusCode::BAD_GATEWAY,
                },
                Core::Transport { .. } | Core::Command { .. } => StatusCode::BAD_GATEWAY,
                Core::Serialization { .. } | Core::Internal { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Error::Cluster(e) => e.summary(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = serde_json::json!({ "error": self.message() });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}
