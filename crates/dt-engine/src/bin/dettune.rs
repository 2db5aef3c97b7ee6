//! DetTune CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dt_engine::{
    connect_tracker, HyperParams, RunSettings, SamplerKind, SearchBounds, StudyConfig,
    StudyDriver, TrialObjective,
};
use dt_tracking::{DEFAULT_TRACKING_URI, TRACKING_URI_ENV};
use dt_trainer::UltralyticsCli;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dettune")]
#[command(about = "DetTune - hyperparameter search for object detection training")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Tracking server address, or `memory` to keep records in process
    #[arg(long, global = true, env = TRACKING_URI_ENV, default_value = DEFAULT_TRACKING_URI)]
    tracking_uri: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a hyperparameter study
    Study {
        #[command(flatten)]
        run: RunArgs,

        /// Number of trials
        #[arg(long, default_value = "5")]
        n_trials: usize,

        #[arg(long, default_value = "yolo_optuna_study")]
        study_name: String,

        /// Tracking experiment name
        #[arg(long, default_value = "cv_yolo_tiny_optuna")]
        exp_name: String,

        #[arg(long, default_value = "3")]
        min_epochs: u32,

        #[arg(long, default_value = "5")]
        max_epochs: u32,

        /// Candidate image sizes
        #[arg(long, num_args = 1.., default_values_t = vec![320u32, 416])]
        imgsz_choices: Vec<u32>,

        #[arg(long, default_value = "0.001")]
        min_lr: f64,

        #[arg(long, default_value = "0.01")]
        max_lr: f64,

        /// Sampler (random, grid)
        #[arg(long, default_value = "random")]
        sampler: SamplerKind,

        /// Points per continuous dimension for the grid sampler
        #[arg(long, default_value = "3")]
        grid_steps: usize,

        /// Directory for the results table and summary
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,

        /// Record failed trials and keep going
        #[arg(long)]
        continue_on_failure: bool,
    },
    /// Run a single tracked training run
    Train {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long, default_value = "3")]
        epochs: u32,

        #[arg(long, default_value = "320")]
        imgsz: u32,

        #[arg(long, default_value = "0.005")]
        lr0: f64,

        /// Tracking experiment name
        #[arg(long, default_value = "cv_yolo_tiny")]
        exp_name: String,
    },
}

/// Options shared by every training run.
#[derive(Args)]
struct RunArgs {
    /// Dataset description file
    #[arg(long, default_value = "data/tiny_coco.yaml")]
    data: String,

    /// Pretrained model
    #[arg(long, default_value = "yolov8n.pt")]
    model: String,

    #[arg(long, default_value = "8")]
    batch: u32,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Value of the `dataset` tag
    #[arg(long, default_value = "tiny_coco_person")]
    dataset_tag: String,

    /// Base directory the trainer writes runs into
    #[arg(long, default_value = "runs/detect")]
    runs_dir: PathBuf,

    /// Trainer executable
    #[arg(long, default_value = "yolo")]
    trainer_bin: String,
}

impl RunArgs {
    fn settings(&self, experiment_name: String) -> RunSettings {
        RunSettings {
            data: self.data.clone(),
            model: self.model.clone(),
            batch: self.batch,
            seed: self.seed,
            experiment_name,
            dataset_tag: self.dataset_tag.clone(),
            runs_dir: self.runs_dir.clone(),
        }
    }

    fn objective(&self, settings: RunSettings, tracking_uri: &str) -> TrialObjective {
        let trainer = Arc::new(UltralyticsCli::new(&self.trainer_bin));
        TrialObjective::new(trainer, connect_tracker(tracking_uri), settings)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_string().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Study {
            run,
            n_trials,
            study_name,
            exp_name,
            min_epochs,
            max_epochs,
            imgsz_choices,
            min_lr,
            max_lr,
            sampler,
            grid_steps,
            reports_dir,
            continue_on_failure,
        } => {
            let settings = run.settings(exp_name);
            let config = StudyConfig::new(study_name, settings.clone())
                .with_trials(n_trials)
                .with_sampler(sampler, grid_steps)
                .with_bounds(SearchBounds {
                    min_epochs,
                    max_epochs,
                    imgsz_choices,
                    min_lr,
                    max_lr,
                })
                .with_reports_dir(reports_dir)
                .with_continue_on_failure(continue_on_failure);

            let objective = run.objective(settings, &cli.tracking_uri);
            let driver =
                StudyDriver::new(config, objective).context("invalid study configuration")?;

            println!("=== DetTune study: {} ===", driver.config().study_name);
            let report = driver.run().await.context("study failed")?;
            println!("{report}");
            println!("Results saved to {}", driver.config().results_path().display());
        }
        Commands::Train {
            run,
            epochs,
            imgsz,
            lr0,
            exp_name,
        } => {
            let settings = run.settings(exp_name);
            settings.validate().context("invalid run settings")?;
            let objective = run.objective(settings, &cli.tracking_uri);

            let hp = HyperParams { epochs, imgsz, lr0 };
            let evaluation = objective.run_single(&hp).await.context("training run failed")?;

            println!("Run {} finished", evaluation.run_name);
            println!("  mAP50: {}", evaluation.objective);
            for (name, value) in evaluation.metrics.to_named() {
                println!("  {name}: {value}");
            }
            if let Some(dir) = evaluation.run_dir {
                println!("  run directory: {}", dir.display());
            }
        }
    }

    Ok(())
}
