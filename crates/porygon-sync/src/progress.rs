//! Progress events and their fan-out to connected observers
//!
//! Every observer owns an unbounded channel; the broadcaster keeps the
//! sending halves in a concurrent map. Delivery works on a snapshot of the
//! map so observers can come and go while a broadcast is in flight. An
//! observer whose receiver is gone is dropped on the next delivery.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::request::SyncStatus;

/// Kind of a progress envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A batch has started
    BatchSyncStarted,
    /// A single workload sync has started
    SyncStarted,
    /// A mutation step of a workload sync
    SyncStep,
    /// A workload was observed at its desired state
    ServiceSynced,
    /// A single workload sync has finished
    SyncComplete,
    /// A batch has finished
    BatchSyncComplete,
}

/// One message on the progress channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    /// What happened
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    /// Event specific fields
    #[serde(rename = "data")]
    pub payload: Value,
}

/// Payload of [`EventType::BatchSyncStarted`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchStarted {
    /// Target namespace
    pub namespace: String,
    /// Number of items in the batch
    pub total: usize,
}

/// Payload of [`EventType::SyncStarted`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStarted {
    /// Target namespace
    pub namespace: String,
    /// Deployment being synced
    pub service_name: String,
    /// Requested image tag
    pub desired_version: String,
    /// Requested replica count
    pub desired_pod_count: i64,
}

/// Mutation applied during a sync
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Container image patched
    UpdateImage,
    /// Replica count patched
    Scale,
    /// Waiting for the rollout to report the desired state
    AwaitConvergence,
}

/// Payload of [`EventType::SyncStep`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStep {
    /// Target namespace
    pub namespace: String,
    /// Deployment being synced
    pub service_name: String,
    /// Which mutation
    pub step: StepKind,
    /// Human readable detail
    pub message: String,
}

/// Payload of [`EventType::ServiceSynced`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSynced {
    /// Target namespace
    pub namespace: String,
    /// Deployment that converged
    pub service_name: String,
    /// Observed image tag
    pub version: String,
    /// Observed ready replicas
    pub pod_count: i32,
}

/// Payload of [`EventType::SyncComplete`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncComplete {
    /// Target namespace
    pub namespace: String,
    /// Deployment that was synced, or `"unknown"` for unnamed batch items
    pub service_name: String,
    /// Outcome
    pub status: SyncStatus,
    /// Failure reason when `status` is error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of [`EventType::BatchSyncComplete`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchComplete {
    /// Target namespace
    pub namespace: String,
    /// Number of items in the batch
    pub total: usize,
    /// Items that synced
    pub success_count: usize,
    /// Items that failed or were invalid
    pub error_count: usize,
}

/// Identifier of a registered observer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Receiving half handed to an observer
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEnvelope>;

/// Cloneable handle fanning progress envelopes out to observers
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    observers: Arc<DashMap<ObserverId, mpsc::UnboundedSender<ProgressEnvelope>>>,
}

impl ProgressBroadcaster {
    /// Create a broadcaster with no observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer
    pub fn register(&self) -> (ObserverId, ProgressReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ObserverId::new();
        self.observers.insert(id, tx);
        debug!(observer = %id, observers = self.observers.len(), "observer registered");
        (id, rx)
    }

    /// Remove an observer; unknown ids are ignored
    pub fn unregister(&self, id: ObserverId) {
        if self.observers.remove(&id).is_some() {
            debug!(observer = %id, observers = self.observers.len(), "observer unregistered");
        }
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Serialize `payload` and deliver it as an `event_type` envelope
    pub fn broadcast<P: Serialize>(&self, event_type: EventType, payload: &P) {
        match serde_json::to_value(payload) {
            Ok(payload) => self.deliver(ProgressEnvelope {
                event_type,
                payload,
            }),
            Err(e) => warn!(event_type = ?event_type, error = %e, "failed to encode progress payload"),
        }
    }

    /// Deliver an envelope to every registered observer
    pub fn deliver(&self, envelope: ProgressEnvelope) {
        let snapshot: Vec<_> = self
            .observers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, tx) in snapshot {
            if tx.send(envelope.clone()).is_err() {
                warn!(observer = %id, event_type = ?envelope.event_type, "observer gone, dropping it");
                self.observers.remove(&id);
            }
        }
    }
}
