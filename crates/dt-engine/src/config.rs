//! Study and run configuration.

use chrono::{DateTime, Utc};
use dt_optimizer::{GridSearch, ObjectiveDirection, RandomSearch, SearchSpace, SearchStrategy};
use dt_types::{config_error, validation_error, DtResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Which sampler drives the study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplerKind {
    #[default]
    Random,
    Grid,
}

impl FromStr for SamplerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "grid" => Ok(Self::Grid),
            other => Err(format!("unknown sampler `{other}` (expected random or grid)")),
        }
    }
}

impl std::fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::Grid => write!(f, "grid"),
        }
    }
}

/// Bounds of the detection search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub min_epochs: u32,
    pub max_epochs: u32,
    pub imgsz_choices: Vec<u32>,
    pub min_lr: f64,
    pub max_lr: f64,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            min_epochs: 3,
            max_epochs: 5,
            imgsz_choices: vec![320, 416],
            min_lr: 0.001,
            max_lr: 0.01,
        }
    }
}

impl SearchBounds {
    /// `epochs` integer range, `imgsz` categorical, `lr0` log-uniform.
    pub fn to_space(&self) -> SearchSpace {
        SearchSpace::new()
            .add_int("epochs", self.min_epochs as i64, self.max_epochs as i64)
            .add_choice(
                "imgsz",
                self.imgsz_choices
                    .iter()
                    .map(|s| serde_json::Value::from(*s))
                    .collect(),
            )
            .add_log_uniform("lr0", self.min_lr, self.max_lr)
    }
}

/// Settings shared by every training run of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Dataset description passed to the trainer.
    pub data: String,
    /// Pretrained model identifier.
    pub model: String,
    pub batch: u32,
    /// Seed applied before every run and handed to the trainer.
    pub seed: u64,
    /// Tracking experiment runs are filed under.
    pub experiment_name: String,
    /// Value of the `dataset` tag.
    pub dataset_tag: String,
    /// Base directory the trainer creates run directories in.
    pub runs_dir: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            data: "data/tiny_coco.yaml".to_string(),
            model: "yolov8n.pt".to_string(),
            batch: 8,
            seed: 42,
            experiment_name: "cv_yolo_tiny_optuna".to_string(),
            dataset_tag: "tiny_coco_person".to_string(),
            runs_dir: PathBuf::from("runs/detect"),
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> DtResult<()> {
        if self.data.is_empty() {
            return Err(config_error!("dataset path must not be empty"));
        }
        if self.model.is_empty() {
            return Err(config_error!("model identifier must not be empty"));
        }
        if self.batch == 0 {
            return Err(config_error!("batch size must be positive"));
        }
        if self.experiment_name.is_empty() {
            return Err(config_error!("experiment name must not be empty"));
        }
        Ok(())
    }
}

/// Top-level configuration for a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub study_name: String,
    pub n_trials: usize,
    pub sampler: SamplerKind,
    /// Points per continuous dimension when the grid sampler is used.
    pub grid_steps: usize,
    pub direction: ObjectiveDirection,
    pub bounds: SearchBounds,
    pub run: RunSettings,
    /// Directory the results table and summary are written to.
    pub reports_dir: PathBuf,
    /// Record failed trials and keep going instead of aborting the study.
    pub continue_on_failure: bool,
    pub created_at: DateTime<Utc>,
}

impl StudyConfig {
    pub fn new(study_name: impl Into<String>, run: RunSettings) -> Self {
        Self {
            study_name: study_name.into(),
            n_trials: 5,
            sampler: SamplerKind::Random,
            grid_steps: 3,
            direction: ObjectiveDirection::Maximize,
            bounds: SearchBounds::default(),
            run,
            reports_dir: PathBuf::from("reports"),
            continue_on_failure: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_trials(mut self, n: usize) -> Self {
        self.n_trials = n;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerKind, grid_steps: usize) -> Self {
        self.sampler = sampler;
        self.grid_steps = grid_steps;
        self
    }

    pub fn with_bounds(mut self, bounds: SearchBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = dir.into();
        self
    }

    pub fn with_continue_on_failure(mut self, keep_going: bool) -> Self {
        self.continue_on_failure = keep_going;
        self
    }

    pub fn validate(&self) -> DtResult<()> {
        if self.study_name.is_empty() {
            return Err(config_error!("study name must not be empty"));
        }
        if self.n_trials == 0 {
            return Err(validation_error!("a study needs at least one trial"));
        }
        if self.bounds.min_epochs == 0 {
            return Err(validation_error!("epochs must be at least 1"));
        }
        if self.bounds.imgsz_choices.iter().any(|s| *s == 0) {
            return Err(validation_error!("image sizes must be positive"));
        }
        self.run.validate()?;
        self.bounds.to_space().validate()
    }

    /// `<reports_dir>/<study_name>_results.csv`
    pub fn results_path(&self) -> PathBuf {
        self.reports_dir.join(format!("{}_results.csv", self.study_name))
    }

    /// `<reports_dir>/<study_name>_summary.json`
    pub fn summary_path(&self) -> PathBuf {
        self.reports_dir.join(format!("{}_summary.json", self.study_name))
    }

    /// Sampler over the configured space, seeded with the run seed.
    pub fn build_sampler(&self) -> DtResult<Box<dyn SearchStrategy>> {
        let space = self.bounds.to_space();
        space.validate()?;
        Ok(match self.sampler {
            SamplerKind::Random => Box::new(RandomSearch::with_seed(space, self.run.seed)),
            SamplerKind::Grid => {
                let grid = GridSearch::new(&space, self.grid_steps);
                tracing::info!("Grid sampler covers {} combinations", grid.len());
                Box::new(grid)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dt_optimizer::ParameterValue;

    #[test]
    fn defaults_describe_the_tiny_detection_study() {
        let config = StudyConfig::new("yolo_optuna_study", RunSettings::default());
        assert_eq!(config.n_trials, 5);
        assert_eq!(config.direction, ObjectiveDirection::Maximize);
        assert_eq!(config.bounds.imgsz_choices, vec![320, 416]);
        assert_eq!(
            config.results_path(),
            PathBuf::from("reports/yolo_optuna_study_results.csv")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn space_has_one_dimension_per_hyperparameter() {
        let space = SearchBounds::default().to_space();
        let names: Vec<&str> = space.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["epochs", "imgsz", "lr0"]);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero_trials = StudyConfig::new("s", RunSettings::default()).with_trials(0);
        assert!(zero_trials.validate().is_err());

        let inverted = StudyConfig::new("s", RunSettings::default()).with_bounds(SearchBounds {
            min_epochs: 6,
            max_epochs: 3,
            ..SearchBounds::default()
        });
        assert!(inverted.validate().is_err());

        let no_sizes = StudyConfig::new("s", RunSettings::default()).with_bounds(SearchBounds {
            imgsz_choices: vec![],
            ..SearchBounds::default()
        });
        assert!(no_sizes.validate().is_err());
    }

    #[test]
    fn seeded_sampler_repeats_itself() {
        let config = StudyConfig::new("s", RunSettings::default());
        let a = config.build_sampler().unwrap().suggest(5);
        let b = config.build_sampler().unwrap().suggest(5);
        assert_eq!(a, b);
        assert!(matches!(a[0]["epochs"], ParameterValue::Int(3..=5)));
    }

    #[test]
    fn grid_sampler_is_finite() {
        let config =
            StudyConfig::new("s", RunSettings::default()).with_sampler(SamplerKind::Grid, 2);
        let mut sampler = config.build_sampler().unwrap();
        // 3 epochs x 2 sizes x 2 learning rates
        assert_eq!(sampler.suggest(100).len(), 12);
        assert_eq!(sampler.name(), "grid");
    }

    #[test]
    fn sampler_kind_parses() {
        assert_eq!("Grid".parse::<SamplerKind>().unwrap(), SamplerKind::Grid);
        assert!("tpe".parse::<SamplerKind>().is_err());
        assert_eq!(SamplerKind::Random.to_string(), "random");
    }
}
