//! In-memory cluster used by the sync tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use porygon_cluster::{ClusterConnector, ClusterGateway, PrivilegedCommand};
use porygon_common::{ClusterCredential, Error};

#[derive(Default)]
struct State {
    deployments: BTreeMap<String, Value>,
    forbidden: BTreeSet<String>,
    patches: Vec<(String, Value)>,
    rollout_completes: bool,
}

/// Deployments of one namespace held in memory
///
/// PATCHes apply replace operations to the stored object. When rollouts are
/// enabled, a patch also moves `status.readyReplicas` to `spec.replicas`.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployment(self, name: &str, image: &str, replicas: i32) -> Self {
        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "namespace": "shop" },
            "spec": {
                "replicas": replicas,
                "selector": {},
                "template": { "spec": { "containers": [
                    { "name": "app", "image": image },
                    { "name": "proxy", "image": "envoy:1.30" }
                ] } }
            },
            "status": { "readyReplicas": replicas }
        });
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert(name.to_string(), deployment);
        self
    }

    /// PATCHes to `name` fail with 403
    pub fn forbid_patches(self, name: &str) -> Self {
        self.state.lock().unwrap().forbidden.insert(name.to_string());
        self
    }

    pub fn with_rollouts(self) -> Self {
        self.state.lock().unwrap().rollout_completes = true;
        self
    }

    /// Deployment names and patch bodies, in order
    pub fn patches(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn deployment(&self, name: &str) -> Value {
        self.state.lock().unwrap().deployments[name].clone()
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, Error> {
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let mut state = self.state.lock().unwrap();

        if method == Method::GET && path.ends_with("/deployments") {
            let items: Vec<_> = state.deployments.values().cloned().collect();
            return Ok(json!({ "items": items }));
        }

        if method == Method::PATCH && state.forbidden.contains(&name) {
            return Err(Error::upstream(
                path,
                403,
                "Forbidden",
                r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"deployments.apps is forbidden","reason":"Forbidden","code":403}"#,
            ));
        }

        let rollout = state.rollout_completes;
        let patch = body.unwrap_or_default();
        let deployment = state
            .deployments
            .get_mut(&name)
            .ok_or_else(|| Error::upstream(path, 404, "Not Found", ""))?;

        if method == Method::PATCH {
            for op in patch.as_array().into_iter().flatten() {
                let pointer = op["path"].as_str().unwrap_or_default();
                if let Some(target) = deployment.pointer_mut(pointer) {
                    *target = op["value"].clone();
                }
            }
            if rollout {
                let replicas = deployment["spec"]["replicas"].clone();
                deployment["status"]["readyReplicas"] = replicas;
            }
            let result = deployment.clone();
            state.patches.push((name, patch));
            return Ok(result);
        }

        Ok(deployment.clone())
    }

    async fn resource_exists(&self, path: &str) -> Result<bool, Error> {
        let name = path.rsplit('/').next().unwrap_or_default();
        Ok(self.state.lock().unwrap().deployments.contains_key(name))
    }

    async fn run_privileged_command(&self, command: &PrivilegedCommand) -> Result<String, Error> {
        Err(Error::command(format!("{:?}", command), "not available in tests"))
    }
}

impl ClusterConnector for FakeCluster {
    fn connect(&self, _credential: &ClusterCredential) -> Arc<dyn ClusterGateway> {
        Arc::new(self.clone())
    }
}

pub fn credential() -> ClusterCredential {
    ClusterCredential::new("https://api.ocp.example.com:6443", "sa-token")
}
