//! # dt-engine
//!
//! Runs hyperparameter studies for a detection trainer: the per-trial
//! objective, the sequential study driver, and the reports written at the end.

pub mod config;
pub mod driver;
pub mod objective;
pub mod report;

pub use config::{RunSettings, SamplerKind, SearchBounds, StudyConfig};
pub use driver::StudyDriver;
pub use objective::{single_run_name, trial_run_name, HyperParams, RunEvaluation, TrialObjective};
pub use report::StudyReport;

use dt_tracking::{InMemoryTracker, MlflowClient, TrackingBackend};
use std::sync::Arc;

/// Tracking URI that selects the in-process backend.
pub const MEMORY_TRACKING_URI: &str = "memory";

/// Backend for a tracking URI: `memory` keeps records in process, anything
/// else is treated as an MLflow server address.
pub fn connect_tracker(uri: &str) -> Arc<dyn TrackingBackend> {
    if uri == MEMORY_TRACKING_URI {
        tracing::warn!("Using in-memory tracking; nothing will be persisted to a tracking server");
        Arc::new(InMemoryTracker::new())
    } else {
        tracing::info!("Tracking to {}", uri);
        Arc::new(MlflowClient::new(uri))
    }
}
