//! Best-effort upload of the files a detection run leaves behind.

use dt_types::{BestEffort, TelemetryError};
use std::path::{Path, PathBuf};

use crate::backend::{RunHandle, TrackingBackend};

/// A file expected inside a run directory and where it goes in the artifact tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// Path relative to the run directory.
    pub relative_path: &'static str,
    /// Artifact group it is filed under.
    pub artifact_path: &'static str,
}

/// Plots and weights written by the detection trainer.
pub const DETECTION_ARTIFACTS: &[ArtifactSpec] = &[
    ArtifactSpec {
        relative_path: "results.png",
        artifact_path: "yolo_plots",
    },
    ArtifactSpec {
        relative_path: "confusion_matrix.png",
        artifact_path: "yolo_plots",
    },
    ArtifactSpec {
        relative_path: "PR_curve.png",
        artifact_path: "yolo_plots",
    },
    ArtifactSpec {
        relative_path: "labels_correlogram.jpg",
        artifact_path: "yolo_plots",
    },
    ArtifactSpec {
        relative_path: "weights/best.pt",
        artifact_path: "weights",
    },
];

/// Upload every expected file that exists. Missing files are skipped and
/// failed uploads are logged; neither is an error. Returns the files that
/// were uploaded.
pub async fn log_run_artifacts(
    backend: &dyn TrackingBackend,
    run: &RunHandle,
    run_dir: &Path,
    specs: &[ArtifactSpec],
) -> Vec<PathBuf> {
    let mut uploaded = Vec::new();

    for spec in specs {
        let path = run_dir.join(spec.relative_path);
        if !path.is_file() {
            continue;
        }

        let outcome = backend
            .log_artifact(run, &path, spec.artifact_path)
            .await
            .map_err(|e| TelemetryError::ArtifactNotLogged {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        if outcome.best_effort().is_some() {
            uploaded.push(path);
        }
    }

    tracing::debug!("Logged {} artifacts for run {}", uploaded.len(), run.run_name);
    uploaded
}
