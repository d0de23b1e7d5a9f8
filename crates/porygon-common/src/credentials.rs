//! Cluster credentials
//!
//! A bearer token paired with the API server endpoint it is valid for.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Credential for one cluster API server
///
/// Immutable once built. Never persisted by Porygon; callers that want to
/// keep a minted credential own that concern.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCredential {
    /// API server base URL (e.g., "https://api.ocp.example.com:6443")
    pub cluster_endpoint: String,
    /// Bearer token presented on every request
    pub bearer_token: String,
}

impl ClusterCredential {
    /// Create a credential, trimming a trailing slash from the endpoint
    pub fn new(cluster_endpoint: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        let endpoint: String = cluster_endpoint.into();
        Self {
            cluster_endpoint: endpoint.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.into(),
        }
    }

    /// Full URL for an API path such as `/api/v1/namespaces`
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.cluster_endpoint, path)
    }
}

impl fmt::Debug for ClusterCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredential")
            .field("cluster_endpoint", &self.cluster_endpoint)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_token() {
        let cred = ClusterCredential::new("https://api.example.com:6443", "sha256~secret");
        let debug = format!("{:?}", cred);
        assert!(debug.contains("api.example.com"));
        assert!(!debug.contains("sha256~secret"));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let cred = ClusterCredential::new("https://api.example.com:6443/", "t");
        assert_eq!(
            cred.url_for("/api/v1/namespaces"),
            "https://api.example.com:6443/api/v1/namespaces"
        );
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let cred = ClusterCredential::new("https://api", "tok");
        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json["clusterEndpoint"], "https://api");
        assert_eq!(json["bearerToken"], "tok");
    }
}
