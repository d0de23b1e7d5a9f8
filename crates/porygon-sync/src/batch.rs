//! Sequential multi-deployment syncs
//!
//! Items are processed strictly one after another with a fixed pause after
//! each, so a namespace never sees more than one rollout starting at a time.
//! A bad item only counts as an error; the batch always runs to the end.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::orchestrator::SyncOrchestrator;
use crate::progress::{BatchComplete, BatchStarted, EventType, SyncComplete};
use crate::request::{ServiceSyncItem, SyncOutcome, SyncStatus, INVALID_ITEM_MESSAGE};
use porygon_common::{ClusterCredential, DEFAULT_SYNC_PACING_SECS};

/// Batch tunables
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchOptions {
    /// Pause after every item
    pub pacing: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            pacing: Duration::from_secs(DEFAULT_SYNC_PACING_SECS),
        }
    }
}

/// Result of a finished batch
#[derive(Clone, Debug)]
pub struct BatchSummary {
    /// Correlates log lines of one batch
    pub batch_id: Uuid,
    /// Target namespace
    pub namespace: String,
    /// Number of items submitted
    pub total: usize,
    /// Items that synced
    pub success_count: usize,
    /// Items that failed or were invalid
    pub error_count: usize,
    /// One outcome per item, in submission order
    pub outcomes: Vec<SyncOutcome>,
    /// When processing started
    pub started_at: DateTime<Utc>,
    /// When the last item finished
    pub finished_at: DateTime<Utc>,
}

/// Runs batches of syncs, one namespace at a time
#[derive(Clone)]
pub struct BatchSequencer {
    orchestrator: SyncOrchestrator,
    options: BatchOptions,
    namespace_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl BatchSequencer {
    /// Create a sequencer publishing through the orchestrator's broadcaster
    pub fn new(orchestrator: SyncOrchestrator, options: BatchOptions) -> Self {
        Self {
            orchestrator,
            options,
            namespace_locks: Arc::new(DashMap::new()),
        }
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.namespace_locks
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    /// Drop the namespace's lock entry once no batch holds or awaits it
    fn release_namespace_lock(&self, namespace: &str) {
        self.namespace_locks
            .remove_if(namespace, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Sync every item against `namespace`
    ///
    /// `BATCH_SYNC_STARTED` goes out immediately. Items are processed under
    /// the namespace lock, so a second batch on the same namespace is
    /// announced at once but waits for this one to finish.
    pub async fn run_batch(
        &self,
        namespace: &str,
        credential: &ClusterCredential,
        items: Vec<Value>,
    ) -> BatchSummary {
        let batch_id = Uuid::new_v4();
        let total = items.len();

        info!(batch = %batch_id, namespace = %namespace, total, "batch sync started");
        self.orchestrator.broadcaster().broadcast(
            EventType::BatchSyncStarted,
            &BatchStarted {
                namespace: namespace.to_string(),
                total,
            },
        );

        let lock = self.namespace_lock(namespace);
        let summary = {
            let _guard = lock.lock().await;
            debug!(batch = %batch_id, namespace = %namespace, "namespace lock acquired");
            self.run_items(batch_id, namespace, credential, items).await
        };
        drop(lock);
        self.release_namespace_lock(namespace);
        summary
    }

    async fn run_items(
        &self,
        batch_id: Uuid,
        namespace: &str,
        credential: &ClusterCredential,
        items: Vec<Value>,
    ) -> BatchSummary {
        let broadcaster = self.orchestrator.broadcaster();
        let total = items.len();
        let started_at = Utc::now();

        let mut outcomes = Vec::with_capacity(total);
        for value in items {
            let outcome = match ServiceSyncItem::from_value(&value) {
                Ok(item) => {
                    let request = item.into_request(namespace, credential);
                    self.orchestrator.sync_one(&request).await
                }
                Err(invalid) => {
                    warn!(
                        batch = %batch_id,
                        namespace = %namespace,
                        service = %invalid.service_name,
                        "skipping invalid batch item"
                    );
                    let outcome = SyncOutcome::error(invalid.service_name, INVALID_ITEM_MESSAGE);
                    broadcaster.broadcast(
                        EventType::SyncComplete,
                        &SyncComplete {
                            namespace: namespace.to_string(),
                            service_name: outcome.service_name.clone(),
                            status: SyncStatus::Error,
                            error: outcome.error.clone(),
                        },
                    );
                    outcome
                }
            };
            outcomes.push(outcome);

            tokio::time::sleep(self.options.pacing).await;
        }

        let success_count = outcomes.iter().filter(|o| o.is_ok()).count();
        let error_count = total - success_count;

        info!(
            batch = %batch_id,
            namespace = %namespace,
            total,
            success_count,
            error_count,
            "batch sync complete"
        );
        broadcaster.broadcast(
            EventType::BatchSyncComplete,
            &BatchComplete {
                namespace: namespace.to_string(),
                total,
                success_count,
                error_count,
            },
        );

        BatchSummary {
            batch_id,
            namespace: namespace.to_string(),
            total,
            success_count,
            error_count,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
