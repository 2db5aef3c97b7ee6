//! # dt-trainer
//!
//! The external detection trainer as seen from a study: a [`Trainer`]
//! collaborator that turns a [`TrainRequest`] into a run directory, the
//! run-directory resolution rules, and the normalizer that reads final
//! metrics out of the trainer's `results.csv`.

pub mod metrics;
pub mod run_dir;
pub mod trainer;

pub use metrics::{extract_metrics, normalize_row, DetectionMetric, MetricsRecord, RESULTS_FILE};
pub use run_dir::{latest_run_dir, resolve_run_dir};
pub use trainer::{TrainOutcome, TrainRequest, Trainer, UltralyticsCli};
