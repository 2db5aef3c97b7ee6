//! # dt-tracking
//!
//! The experiment-tracking collaborator. [`TrackingBackend`] is what a trial
//! talks to; [`MlflowClient`] speaks the MLflow REST API and
//! [`InMemoryTracker`] keeps everything in process for offline runs and tests.

pub mod artifacts;
pub mod backend;
pub mod memory;
pub mod mlflow;

pub use artifacts::{log_run_artifacts, ArtifactSpec, DETECTION_ARTIFACTS};
pub use backend::{KeyValue, RunHandle, RunStatus, TrackingBackend, TrackingResult};
pub use memory::{InMemoryTracker, LoggedArtifact, TrackedRun};
pub use mlflow::{MlflowClient, DEFAULT_TRACKING_URI, TRACKING_URI_ENV};
