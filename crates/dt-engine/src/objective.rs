//! The per-trial objective: one training run, tracked end to end.

use dt_optimizer::{ParameterSample, ParameterValue};
use dt_tracking::{
    log_run_artifacts, KeyValue, RunHandle, RunStatus, TrackingBackend, DETECTION_ARTIFACTS,
};
use dt_trainer::{extract_metrics, DetectionMetric, MetricsRecord, TrainRequest, Trainer};
use dt_types::{set_global_seed, DtResult, StudyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RunSettings;

/// Value of the `task` tag on every run.
pub const TASK_TAG: &str = "object-detection";

/// Objective reported when a run produced no mAP50.
pub const WORST_OBJECTIVE: f64 = 0.0;

/// The sampled hyperparameters of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub epochs: u32,
    pub imgsz: u32,
    pub lr0: f64,
}

fn read_u32(sample: &ParameterSample, name: &str) -> DtResult<u32> {
    sample
        .get(name)
        .and_then(ParameterValue::as_i64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            StudyError::BadSample {
                name: name.to_string(),
            }
            .into()
        })
}

impl HyperParams {
    pub fn from_sample(sample: &ParameterSample) -> DtResult<Self> {
        let lr0 = sample
            .get("lr0")
            .and_then(ParameterValue::as_f64)
            .ok_or_else(|| StudyError::BadSample {
                name: "lr0".to_string(),
            })?;
        Ok(Self {
            epochs: read_u32(sample, "epochs")?,
            imgsz: read_u32(sample, "imgsz")?,
            lr0,
        })
    }
}

/// Run name for a study trial; doubles as the trainer's run directory name.
pub fn trial_run_name(number: usize, hp: &HyperParams) -> String {
    format!(
        "yolo_trial_{}_e{}_sz{}_lr{:.4}",
        number, hp.epochs, hp.imgsz, hp.lr0
    )
}

/// Run name for a standalone training run.
pub fn single_run_name(model: &str, hp: &HyperParams, seed: u64) -> String {
    let stem = Path::new(model)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| model.to_string());
    format!("{}_e{}_sz{}_lr{}_s{}", stem, hp.epochs, hp.imgsz, hp.lr0, seed)
}

/// What one tracked training run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEvaluation {
    pub run_name: String,
    /// mAP50, or [`WORST_OBJECTIVE`] when it was not found.
    pub objective: f64,
    pub metrics: MetricsRecord,
    pub run_dir: Option<PathBuf>,
    pub artifacts: Vec<PathBuf>,
}

/// Runs the trainer for one parameter sample and records everything to the
/// tracking backend.
///
/// Only one evaluation may run at a time: the run-directory fallback picks
/// the newest directory under the runs base.
pub struct TrialObjective {
    trainer: Arc<dyn Trainer>,
    tracker: Arc<dyn TrackingBackend>,
    settings: RunSettings,
}

impl TrialObjective {
    pub fn new(
        trainer: Arc<dyn Trainer>,
        tracker: Arc<dyn TrackingBackend>,
        settings: RunSettings,
    ) -> Self {
        Self {
            trainer,
            tracker,
            settings,
        }
    }

    /// Evaluate trial `number` of a study.
    pub async fn evaluate(
        &self,
        number: usize,
        hp: &HyperParams,
        study_name: &str,
        sampler_name: &str,
    ) -> DtResult<RunEvaluation> {
        let run_name = trial_run_name(number, hp);
        let extra_params = vec![("trial_number".to_string(), number.to_string())];
        let extra_tags = vec![
            ("optimizer".to_string(), sampler_name.to_string()),
            ("study_name".to_string(), study_name.to_string()),
        ];
        self.execute(run_name, hp, extra_params, extra_tags).await
    }

    /// A standalone training run with fixed hyperparameters.
    pub async fn run_single(&self, hp: &HyperParams) -> DtResult<RunEvaluation> {
        let run_name = single_run_name(&self.settings.model, hp, self.settings.seed);
        self.execute(run_name, hp, Vec::new(), Vec::new()).await
    }

    async fn execute(
        &self,
        run_name: String,
        hp: &HyperParams,
        extra_params: Vec<KeyValue>,
        extra_tags: Vec<KeyValue>,
    ) -> DtResult<RunEvaluation> {
        set_global_seed(self.settings.seed);

        let experiment_id = self
            .tracker
            .ensure_experiment(&self.settings.experiment_name)
            .await?;
        let run = self.tracker.start_run(&experiment_id, &run_name).await?;

        let outcome = self.tracked(&run, hp, extra_params, extra_tags).await;
        let status = if outcome.is_ok() {
            RunStatus::Finished
        } else {
            RunStatus::Failed
        };

        match (outcome, self.tracker.end_run(&run, status).await) {
            (Ok(evaluation), Ok(())) => Ok(evaluation),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), close) => {
                if let Err(close_err) = close {
                    tracing::warn!("Could not mark run {} as failed: {}", run_name, close_err);
                }
                Err(e)
            }
        }
    }

    /// Everything that happens while the tracking run is open.
    async fn tracked(
        &self,
        run: &RunHandle,
        hp: &HyperParams,
        extra_params: Vec<KeyValue>,
        extra_tags: Vec<KeyValue>,
    ) -> DtResult<RunEvaluation> {
        let s = &self.settings;
        let mut params: Vec<KeyValue> = vec![
            ("model".into(), s.model.clone()),
            ("epochs".into(), hp.epochs.to_string()),
            ("imgsz".into(), hp.imgsz.to_string()),
            ("lr0".into(), hp.lr0.to_string()),
            ("batch".into(), s.batch.to_string()),
            ("seed".into(), s.seed.to_string()),
            ("data".into(), s.data.clone()),
        ];
        params.extend(extra_params);
        let mut tags: Vec<KeyValue> = vec![
            ("task".into(), TASK_TAG.into()),
            ("dataset".into(), s.dataset_tag.clone()),
        ];
        tags.extend(extra_tags);

        // Logged before training so a failed run still shows its inputs.
        self.tracker.log_params(run, &params).await?;
        self.tracker.set_tags(run, &tags).await?;

        tracing::info!(
            "Run {}: epochs={}, imgsz={}, lr0={:.4}",
            run.run_name,
            hp.epochs,
            hp.imgsz,
            hp.lr0
        );

        let request = TrainRequest {
            data: s.data.clone(),
            model: s.model.clone(),
            epochs: hp.epochs,
            imgsz: hp.imgsz,
            lr0: hp.lr0,
            batch: s.batch,
            seed: dt_types::global_seed(),
            project: s.runs_dir.clone(),
            name: run.run_name.clone(),
        };
        let outcome = self.trainer.train(&request).await?;

        let mut metrics = MetricsRecord::new();
        let mut artifacts = Vec::new();
        match &outcome.run_dir {
            Some(run_dir) => {
                metrics = extract_metrics(run_dir);
                for (metric, value) in metrics.iter() {
                    self.tracker.log_metric(run, metric.key(), value).await?;
                }
                artifacts =
                    log_run_artifacts(self.tracker.as_ref(), run, run_dir, DETECTION_ARTIFACTS)
                        .await;
                self.tracker
                    .log_params(
                        run,
                        &[("yolo_run_dir".to_string(), run_dir.display().to_string())],
                    )
                    .await?;
            }
            None => tracing::warn!("No run directory found for {}", run.run_name),
        }

        let objective = metrics
            .get(DetectionMetric::Map50)
            .unwrap_or(WORST_OBJECTIVE);
        tracing::info!(
            "Run {} completed: mAP50={:.4}, metrics={:?}",
            run.run_name,
            objective,
            metrics.to_named()
        );

        Ok(RunEvaluation {
            run_name: run.run_name.clone(),
            objective,
            metrics,
            run_dir: outcome.run_dir,
            artifacts,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use dt_tracking::InMemoryTracker;
    use dt_trainer::{TrainOutcome, RESULTS_FILE};
    use dt_types::{DtError, TrainerError};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Run names seen by a fake trainer, in call order.
    #[derive(Debug, Default)]
    pub(crate) struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn push(&self, name: &str) {
            self.0.lock().unwrap().push(name.to_string());
        }

        pub fn names(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    /// What the fake trainer writes into the run directory.
    #[derive(Debug, Clone)]
    pub(crate) enum Script {
        /// Write `results.csv` (and the listed extra files) at the expected path.
        Results { csv: String, files: Vec<&'static str> },
        /// Write results into a differently named sibling directory.
        Renamed { csv: String, suffix: &'static str },
        /// Produce nothing at all.
        Nothing,
        /// Fail the run.
        Fail,
    }

    pub(crate) struct FakeTrainer {
        pub script: Script,
        pub seen: Recorder,
    }

    impl FakeTrainer {
        pub fn new(script: Script) -> Self {
            Self {
                script,
                seen: Recorder::default(),
            }
        }

        /// Writes a results table whose mAP50 depends on the learning rate.
        pub fn lr_sensitive() -> Self {
            Self::new(Script::Results {
                csv: String::new(),
                files: vec![],
            })
        }
    }

    #[async_trait]
    impl Trainer for FakeTrainer {
        async fn train(&self, request: &TrainRequest) -> Result<TrainOutcome, TrainerError> {
            self.seen.push(&request.name);
            let expected = request.expected_run_dir();
            match &self.script {
                Script::Results { csv, files } => {
                    fs::create_dir_all(expected.join("weights")).unwrap();
                    let table = if csv.is_empty() {
                        format!(
                            "epoch,metrics/mAP50(B)\n1,{}\n",
                            (request.lr0 * 10.0).min(1.0)
                        )
                    } else {
                        csv.clone()
                    };
                    fs::write(expected.join(RESULTS_FILE), table).unwrap();
                    for file in files {
                        fs::write(expected.join(file), b"artifact").unwrap();
                    }
                    Ok(TrainOutcome {
                        run_dir: Some(expected),
                    })
                }
                Script::Renamed { csv, suffix } => {
                    let renamed = request.project.join(format!("{}{}", request.name, suffix));
                    fs::create_dir_all(&renamed).unwrap();
                    fs::write(renamed.join(RESULTS_FILE), csv).unwrap();
                    Ok(TrainOutcome {
                        run_dir: dt_trainer::resolve_run_dir(None, &request.project, &request.name),
                    })
                }
                Script::Nothing => Ok(TrainOutcome {
                    run_dir: dt_trainer::resolve_run_dir(None, &request.project, &request.name),
                }),
                Script::Fail => Err(TrainerError::Exited {
                    run_name: request.name.clone(),
                    status: "exit status: 1".to_string(),
                }),
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    pub(crate) fn settings(runs: &Path) -> RunSettings {
        RunSettings {
            runs_dir: runs.join("runs").join("detect"),
            ..RunSettings::default()
        }
    }

    fn hp() -> HyperParams {
        HyperParams {
            epochs: 3,
            imgsz: 320,
            lr0: 0.005,
        }
    }

    fn objective(trainer: FakeTrainer, tmp: &TempDir) -> (TrialObjective, Arc<InMemoryTracker>) {
        let tracker = Arc::new(InMemoryTracker::new());
        let objective =
            TrialObjective::new(Arc::new(trainer), tracker.clone(), settings(tmp.path()));
        (objective, tracker)
    }

    #[test]
    fn run_names_encode_trial_and_parameters() {
        assert_eq!(trial_run_name(2, &hp()), "yolo_trial_2_e3_sz320_lr0.0050");
        assert_eq!(
            single_run_name("weights/yolov8n.pt", &hp(), 42),
            "yolov8n_e3_sz320_lr0.005_s42"
        );
    }

    #[test]
    fn hyperparams_come_from_samples() {
        let mut sample = ParameterSample::new();
        sample.insert("epochs".into(), ParameterValue::Int(4));
        sample.insert("imgsz".into(), ParameterValue::Json(serde_json::json!(416)));
        sample.insert("lr0".into(), ParameterValue::Float(0.002));
        let hp = HyperParams::from_sample(&sample).unwrap();
        assert_eq!((hp.epochs, hp.imgsz, hp.lr0), (4, 416, 0.002));

        sample.remove("imgsz");
        assert!(matches!(
            HyperParams::from_sample(&sample),
            Err(DtError::Study(StudyError::BadSample { .. }))
        ));
    }

    #[tokio::test]
    async fn metrics_artifacts_and_objective_are_recorded() {
        let tmp = TempDir::new().unwrap();
        let trainer = FakeTrainer::new(Script::Results {
            csv: "epoch,metrics/precision(B),metrics/mAP50(B)\n1,0.5,0.3\n2,0.8,0.55\n".into(),
            files: vec!["results.png", "confusion_matrix.png", "weights/best.pt"],
        });
        let (objective, tracker) = objective(trainer, &tmp);

        let eval = objective.evaluate(0, &hp(), "yolo_optuna_study", "random").await.unwrap();
        assert_eq!(eval.objective, 0.55);
        assert_eq!(eval.metrics.get(DetectionMetric::Map50), Some(0.55));
        assert_eq!(eval.metrics.get(DetectionMetric::Precision), Some(0.8));
        assert_eq!(eval.metrics.len(), 2);
        assert_eq!(eval.artifacts.len(), 3);

        let run = tracker.run_named("yolo_trial_0_e3_sz320_lr0.0050").unwrap();
        assert_eq!(run.param("epochs"), Some("3"));
        assert_eq!(run.param("trial_number"), Some("0"));
        assert_eq!(run.param("seed"), Some("42"));
        assert!(run.param("yolo_run_dir").unwrap().ends_with("yolo_trial_0_e3_sz320_lr0.0050"));
        assert_eq!(run.tag("task"), Some(TASK_TAG));
        assert_eq!(run.tag("dataset"), Some("tiny_coco_person"));
        assert_eq!(run.tag("study_name"), Some("yolo_optuna_study"));
        assert_eq!(run.metric("mAP50"), Some(0.55));
        assert_eq!(run.metric("precision"), Some(0.8));
        assert_eq!(run.metric("recall"), None);
        assert_eq!(run.status, Some(RunStatus::Finished));
    }

    #[tokio::test]
    async fn missing_map50_scores_zero() {
        let tmp = TempDir::new().unwrap();
        let trainer = FakeTrainer::new(Script::Results {
            csv: "epoch,metrics/precision(B),metrics/recall(B)\n1,0.7,0.6\n".into(),
            files: vec![],
        });
        let (objective, _) = objective(trainer, &tmp);

        let eval = objective.evaluate(1, &hp(), "s", "random").await.unwrap();
        assert_eq!(eval.objective, 0.0);
        assert_eq!(eval.metrics.get(DetectionMetric::Recall), Some(0.6));
    }

    #[tokio::test]
    async fn absent_run_directory_scores_zero_and_logs_nothing() {
        let tmp = TempDir::new().unwrap();
        let (objective, tracker) = objective(FakeTrainer::new(Script::Nothing), &tmp);

        let eval = objective.evaluate(0, &hp(), "s", "random").await.unwrap();
        assert_eq!(eval.objective, 0.0);
        assert!(eval.metrics.is_empty());
        assert!(eval.run_dir.is_none());

        let run = tracker.runs().pop().unwrap();
        assert!(run.metrics.is_empty());
        assert!(run.artifacts.is_empty());
        assert_eq!(run.param("yolo_run_dir"), None);
        // Inputs are still on record.
        assert_eq!(run.param("lr0"), Some("0.005"));
    }

    #[tokio::test]
    async fn renamed_run_directory_is_found_by_recency() {
        let tmp = TempDir::new().unwrap();
        let trainer = FakeTrainer::new(Script::Renamed {
            csv: "metrics/mAP50(B)\n0.42\n".into(),
            suffix: "2",
        });
        let (objective, tracker) = objective(trainer, &tmp);

        let eval = objective.evaluate(0, &hp(), "s", "random").await.unwrap();
        assert_eq!(eval.objective, 0.42);
        let dir = eval.run_dir.unwrap();
        assert!(dir.ends_with("yolo_trial_0_e3_sz320_lr0.00502"));
        assert!(tracker.runs()[0].param("yolo_run_dir").is_some());
    }

    #[tokio::test]
    async fn trainer_failure_fails_the_run_and_propagates() {
        let tmp = TempDir::new().unwrap();
        let (objective, tracker) = objective(FakeTrainer::new(Script::Fail), &tmp);

        let err = objective.evaluate(0, &hp(), "s", "random").await.unwrap_err();
        assert!(matches!(err, DtError::Trainer(TrainerError::Exited { .. })));

        let run = tracker.runs().pop().unwrap();
        assert_eq!(run.status, Some(RunStatus::Failed));
        assert_eq!(run.param("epochs"), Some("3"));
    }

    #[tokio::test]
    async fn single_runs_use_the_model_stem_name() {
        let tmp = TempDir::new().unwrap();
        let trainer = FakeTrainer::lr_sensitive();
        let (objective, tracker) = objective(trainer, &tmp);

        let eval = objective.run_single(&hp()).await.unwrap();
        assert_eq!(eval.run_name, "yolov8n_e3_sz320_lr0.005_s42");
        assert!((eval.objective - 0.05).abs() < 1e-12);
        let run = tracker.run_named(&eval.run_name).unwrap();
        assert_eq!(run.param("trial_number"), None);
        assert_eq!(run.tag("study_name"), None);
    }
}
