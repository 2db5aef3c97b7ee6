//! In-process tracking backend.

use async_trait::async_trait;
use dt_types::TrackingError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::{KeyValue, RunHandle, RunStatus, TrackingBackend, TrackingResult};

/// An artifact as recorded by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedArtifact {
    pub artifact_path: String,
    pub file_name: String,
    pub source: PathBuf,
}

/// Everything logged against one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRun {
    pub handle: RunHandle,
    pub params: Vec<KeyValue>,
    pub tags: Vec<KeyValue>,
    pub metrics: Vec<(String, f64)>,
    pub artifacts: Vec<LoggedArtifact>,
    pub status: Option<RunStatus>,
}

impl TrackedRun {
    pub fn param(&self, key: &str) -> Option<&str> {
        lookup(&self.params, key)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        lookup(&self.tags, key)
    }

    /// Last value logged for a metric.
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }
}

fn lookup<'a>(pairs: &'a [KeyValue], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Default)]
struct MemoryState {
    experiments: BTreeMap<String, String>,
    runs: Vec<TrackedRun>,
}

impl MemoryState {
    fn run_mut(&mut self, run: &RunHandle) -> TrackingResult<&mut TrackedRun> {
        self.runs
            .iter_mut()
            .find(|r| r.handle.run_id == run.run_id)
            .ok_or_else(|| TrackingError::UnknownRun {
                run_id: run.run_id.clone(),
            })
    }
}

/// Tracking backend that keeps every record in memory.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<MemoryState>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all runs in creation order.
    pub fn runs(&self) -> Vec<TrackedRun> {
        self.state.lock().runs.clone()
    }

    pub fn run_named(&self, run_name: &str) -> Option<TrackedRun> {
        self.state
            .lock()
            .runs
            .iter()
            .find(|r| r.handle.run_name == run_name)
            .cloned()
    }
}

#[async_trait]
impl TrackingBackend for InMemoryTracker {
    async fn ensure_experiment(&self, name: &str) -> TrackingResult<String> {
        let mut state = self.state.lock();
        let next_id = state.experiments.len().to_string();
        Ok(state
            .experiments
            .entry(name.to_string())
            .or_insert(next_id)
            .clone())
    }

    async fn start_run(&self, experiment_id: &str, run_name: &str) -> TrackingResult<RunHandle> {
        let mut state = self.state.lock();
        let run_id = format!("run-{}", state.runs.len());
        let handle = RunHandle {
            artifact_uri: format!("memory:/{experiment_id}/{run_id}/artifacts"),
            run_id,
            experiment_id: experiment_id.to_string(),
            run_name: run_name.to_string(),
        };
        state.runs.push(TrackedRun {
            handle: handle.clone(),
            params: Vec::new(),
            tags: Vec::new(),
            metrics: Vec::new(),
            artifacts: Vec::new(),
            status: None,
        });
        Ok(handle)
    }

    async fn log_params(&self, run: &RunHandle, params: &[KeyValue]) -> TrackingResult<()> {
        let mut state = self.state.lock();
        state.run_mut(run)?.params.extend_from_slice(params);
        Ok(())
    }

    async fn set_tags(&self, run: &RunHandle, tags: &[KeyValue]) -> TrackingResult<()> {
        let mut state = self.state.lock();
        state.run_mut(run)?.tags.extend_from_slice(tags);
        Ok(())
    }

    async fn log_metric(&self, run: &RunHandle, key: &str, value: f64) -> TrackingResult<()> {
        let mut state = self.state.lock();
        state.run_mut(run)?.metrics.push((key.to_string(), value));
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        local_path: &Path,
        artifact_path: &str,
    ) -> TrackingResult<()> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| TrackingError::Artifact {
                path: local_path.display().to_string(),
                message: "path has no file name".to_string(),
            })?;
        let mut state = self.state.lock();
        state.run_mut(run)?.artifacts.push(LoggedArtifact {
            artifact_path: artifact_path.to_string(),
            file_name,
            source: local_path.to_path_buf(),
        });
        Ok(())
    }

    async fn end_run(&self, run: &RunHandle, status: RunStatus) -> TrackingResult<()> {
        let mut state = self.state.lock();
        state.run_mut(run)?.status = Some(status);
        Ok(())
    }

    fn uri(&self) -> &str {
        "memory"
    }
}
