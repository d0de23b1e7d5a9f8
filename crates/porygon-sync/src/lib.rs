//! Deployment reconciliation for Porygon
//!
//! [`SyncOrchestrator`] converges one deployment, [`BatchSequencer`] walks a
//! list of them, and [`ProgressBroadcaster`] streams what happens to every
//! connected observer.

#![deny(missing_docs)]

pub mod batch;
pub mod orchestrator;
pub mod progress;
pub mod request;

#[cfg(test)]
mod testing;

pub use batch::{BatchOptions, BatchSequencer, BatchSummary};
pub use orchestrator::{ConvergenceOptions, SyncOptions, SyncOrchestrator};
pub use progress::{EventType, ObserverId, ProgressBroadcaster, ProgressEnvelope, ProgressReceiver};
pub use request::{ServiceSyncItem, SyncOutcome, SyncRequest, SyncStatus};
