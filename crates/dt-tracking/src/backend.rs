//! Tracking backend abstraction.

use async_trait::async_trait;
use dt_types::TrackingError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result alias for tracking operations.
pub type TrackingResult<T> = Result<T, TrackingError>;

/// A parameter or tag as sent to the backend.
pub type KeyValue = (String, String);

/// Identifies an open tracking run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: String,
    /// Where the backend stores this run's artifacts.
    pub artifact_uri: String,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// Core tracking interface.
///
/// Implementations may talk to a remote tracking server or keep records in
/// memory (see [`super::memory::InMemoryTracker`]).
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    /// Look up an experiment by name, creating it if missing. Returns its id.
    async fn ensure_experiment(&self, name: &str) -> TrackingResult<String>;

    /// Open a new run inside an experiment.
    async fn start_run(&self, experiment_id: &str, run_name: &str) -> TrackingResult<RunHandle>;

    async fn log_params(&self, run: &RunHandle, params: &[KeyValue]) -> TrackingResult<()>;

    async fn set_tags(&self, run: &RunHandle, tags: &[KeyValue]) -> TrackingResult<()>;

    async fn log_metric(&self, run: &RunHandle, key: &str, value: f64) -> TrackingResult<()>;

    /// Store a local file under `artifact_path` in the run's artifact tree.
    async fn log_artifact(
        &self,
        run: &RunHandle,
        local_path: &Path,
        artifact_path: &str,
    ) -> TrackingResult<()>;

    /// Close the run with a terminal status.
    async fn end_run(&self, run: &RunHandle, status: RunStatus) -> TrackingResult<()>;

    /// Where this backend stores its records.
    fn uri(&self) -> &str;
}
