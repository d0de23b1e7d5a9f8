//! Sync requests and their outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use porygon_common::{validate_name, validate_namespace, ClusterCredential, Error};

/// Service name reported for batch items without a usable name
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Error reported for malformed batch items
pub const INVALID_ITEM_MESSAGE: &str =
    "Invalid service payload (missing name/desiredVersion/desiredPodCount)";

/// Desired state of one deployment
#[derive(Clone, Debug)]
pub struct SyncRequest {
    /// Namespace of the deployment
    pub namespace: String,
    /// Deployment name
    pub service_name: String,
    /// Image tag to run
    pub desired_version: String,
    /// Replica count to run
    pub desired_pod_count: i64,
    /// Container to retag; the first container when absent
    pub container: Option<String>,
    /// Credential used for every cluster call of this sync
    pub credential: ClusterCredential,
}

impl SyncRequest {
    /// Check every field before anything touches the cluster
    pub fn validate(&self) -> Result<(), Error> {
        if self.namespace.trim().is_empty() {
            return Err(Error::invalid_field("namespace", "must not be empty"));
        }
        if self.service_name.trim().is_empty() {
            return Err(Error::invalid_field("serviceName", "must not be empty"));
        }
        validate_namespace("namespace", &self.namespace)?;
        validate_name("serviceName", &self.service_name)?;
        if self.desired_version.trim().is_empty() {
            return Err(Error::invalid_field("desiredVersion", "must not be empty"));
        }
        if self.desired_pod_count < 0 {
            return Err(Error::invalid_field(
                "desiredPodCount",
                "must be a non-negative integer",
            ));
        }
        if i32::try_from(self.desired_pod_count).is_err() {
            return Err(Error::invalid_field("desiredPodCount", "is too large"));
        }
        if matches!(&self.container, Some(c) if c.trim().is_empty()) {
            return Err(Error::invalid_field("container", "must not be empty when set"));
        }
        if self.credential.cluster_endpoint.is_empty() || self.credential.bearer_token.is_empty() {
            return Err(Error::invalid_field("credential", "cluster URL and token are required"));
        }
        Ok(())
    }

    /// Desired replicas as the cluster's integer type; valid after [`validate`](Self::validate)
    pub fn desired_replicas(&self) -> i32 {
        i32::try_from(self.desired_pod_count).unwrap_or(i32::MAX)
    }
}

/// One entry of a batch sync, as sent by the client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSyncItem {
    /// Deployment name
    pub name: String,
    /// Image tag to run
    pub desired_version: String,
    /// Replica count to run
    pub desired_pod_count: i64,
    /// Container to retag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl ServiceSyncItem {
    /// Parse a raw batch entry
    ///
    /// On failure the error carries the best service name available for
    /// reporting: the entry's `name` when it is a non-empty string, otherwise
    /// `"unknown"`.
    pub fn from_value(value: &Value) -> Result<Self, InvalidItem> {
        let invalid = || InvalidItem {
            service_name: value
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .unwrap_or(UNKNOWN_SERVICE)
                .to_string(),
        };

        let item: ServiceSyncItem = serde_json::from_value(value.clone()).map_err(|_| invalid())?;
        if item.name.trim().is_empty()
            || item.desired_version.trim().is_empty()
            || item.desired_pod_count < 0
        {
            return Err(invalid());
        }
        Ok(item)
    }

    /// Full request for this item
    pub fn into_request(self, namespace: &str, credential: &ClusterCredential) -> SyncRequest {
        SyncRequest {
            namespace: namespace.to_string(),
            service_name: self.name,
            desired_version: self.desired_version,
            desired_pod_count: self.desired_pod_count,
            container: self.container,
            credential: credential.clone(),
        }
    }
}

/// A batch entry that could not be turned into a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidItem {
    /// Name to report the failure under
    pub service_name: String,
}

/// Terminal status of one sync
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// All patches were accepted
    Ok,
    /// The sync failed
    Error,
}

/// Result of one sync, produced exactly once per processed request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Deployment that was synced
    pub service_name: String,
    /// Terminal status
    pub status: SyncStatus,
    /// Failure reason
    pub error: Option<String>,
}

impl SyncOutcome {
    /// Successful outcome
    pub fn ok(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            status: SyncStatus::Ok,
            error: None,
        }
    }

    /// Failed outcome
    pub fn error(service_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            status: SyncStatus::Error,
            error: Some(error.into()),
        }
    }

    /// Whether the sync succeeded
    pub fn is_ok(&self) -> bool {
        self.status == SyncStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> SyncRequest {
        SyncRequest {
            namespace: "shop".to_string(),
            service_name: "cart".to_string(),
            desired_version: "2.0".to_string(),
            desired_pod_count: 3,
            container: None,
            credential: ClusterCredential::new("https://api", "sa-token"),
        }
    }

    #[test]
    fn valid_request_passes() {
        request().validate().unwrap();
    }

    #[test]
    fn zero_replicas_is_valid() {
        let mut req = request();
        req.desired_pod_count = 0;
        req.validate().unwrap();
        assert_eq!(req.desired_replicas(), 0);
    }

    #[test]
    fn invalid_fields_are_named() {
        let cases: Vec<(&str, Box<dyn Fn(&mut SyncRequest)>)> = vec![
            ("namespace", Box::new(|r: &mut SyncRequest| r.namespace.clear())),
            ("serviceName", Box::new(|r: &mut SyncRequest| r.service_name = " ".to_string())),
            ("desiredVersion", Box::new(|r: &mut SyncRequest| r.desired_version.clear())),
            ("desiredPodCount", Box::new(|r: &mut SyncRequest| r.desired_pod_count = -1)),
            ("desiredPodCount", Box::new(|r: &mut SyncRequest| r.desired_pod_count = i64::MAX)),
            ("namespace", Box::new(|r: &mut SyncRequest| r.namespace = "../kube-system".to_string())),
            ("serviceName", Box::new(|r: &mut SyncRequest| r.service_name = "../../pods/x".to_string())),
            ("serviceName", Box::new(|r: &mut SyncRequest| r.service_name = "--all".to_string())),
            ("container", Box::new(|r: &mut SyncRequest| r.container = Some(String::new()))),
            ("credential", Box::new(|r: &mut SyncRequest| r.credential.bearer_token.clear())),
        ];

        for (field, mutate) in cases {
            let mut req = request();
            mutate(&mut req);
            match req.validate() {
                Err(Error::InvalidRequest { field: Some(f), .. }) => assert_eq!(f, field),
                other => panic!("expected invalid {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn item_parses_camel_case() {
        let item = ServiceSyncItem::from_value(&json!({
            "name": "cart",
            "desiredVersion": "2.0",
            "desiredPodCount": 2
        }))
        .unwrap();
        assert_eq!(item.name, "cart");
        assert_eq!(item.desired_pod_count, 2);
        assert_eq!(item.container, None);
    }

    #[test]
    fn item_missing_version_keeps_its_name() {
        let err = ServiceSyncItem::from_value(&json!({ "name": "cart", "desiredPodCount": 2 }))
            .unwrap_err();
        assert_eq!(err.service_name, "cart");
    }

    #[test]
    fn item_without_name_is_unknown() {
        let err = ServiceSyncItem::from_value(&json!({ "desiredVersion": "1", "desiredPodCount": 1 }))
            .unwrap_err();
        assert_eq!(err.service_name, UNKNOWN_SERVICE);

        let err = ServiceSyncItem::from_value(&json!("cart")).unwrap_err();
        assert_eq!(err.service_name, UNKNOWN_SERVICE);
    }

    #[test]
    fn item_count_must_be_non_negative_integer() {
        for count in [json!(-1), json!(2.5), json!("3")] {
            let value = json!({ "name": "cart", "desiredVersion": "1", "desiredPodCount": count });
            assert!(ServiceSyncItem::from_value(&value).is_err(), "{:?}", value);
        }
    }

    #[test]
    fn item_into_request_carries_credential() {
        let credential = ClusterCredential::new("https://api", "sa-token");
        let req = ServiceSyncItem {
            name: "cart".to_string(),
            desired_version: "2.0".to_string(),
            desired_pod_count: 1,
            container: Some("app".to_string()),
        }
        .into_request("shop", &credential);
        assert_eq!(req.namespace, "shop");
        assert_eq!(req.credential, credential);
        assert_eq!(req.container.as_deref(), Some("app"));
        req.validate().unwrap();
    }
}
