//! Sequential study driver.

use dt_optimizer::{StudyStatus, Trial, TrialResult, TrialStatus};
use dt_types::{DtError, DtResult, StudyError};

use crate::config::StudyConfig;
use crate::objective::{HyperParams, TrialObjective};
use crate::report::StudyReport;

/// Runs a study: samples parameters, evaluates one trial at a time and
/// writes the report.
pub struct StudyDriver {
    config: StudyConfig,
    objective: TrialObjective,
}

impl StudyDriver {
    pub fn new(config: StudyConfig, objective: TrialObjective) -> DtResult<Self> {
        config.validate()?;
        Ok(Self { config, objective })
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub async fn run(&self) -> DtResult<StudyReport> {
        let mut sampler = self.config.build_sampler()?;
        let mut status = StudyStatus::new(&self.config.study_name, self.config.direction);
        let mut trials: Vec<Trial> = Vec::with_capacity(self.config.n_trials);
        status.mark_running();

        tracing::info!(
            "Starting study {} with {} trials ({} sampler)",
            self.config.study_name,
            self.config.n_trials,
            sampler.name()
        );

        for number in 0..self.config.n_trials {
            let Some(sample) = sampler.suggest(1).pop() else {
                tracing::info!("Sampler exhausted after {} trials", number);
                break;
            };

            let mut trial = Trial::new(status.id, number, sample);
            trial.mark_running();

            let evaluated = match HyperParams::from_sample(&trial.parameters) {
                Ok(hp) => {
                    self.objective
                        .evaluate(number, &hp, &self.config.study_name, sampler.name())
                        .await
                }
                Err(e) => Err(e),
            };

            match evaluated {
                Ok(evaluation) => {
                    sampler.report(&trial.parameters, evaluation.objective);
                    trial.mark_completed(TrialResult {
                        trial_number: number,
                        objective: evaluation.objective,
                        metrics: evaluation.metrics.to_named(),
                        parameters: trial.parameters.clone(),
                        run_name: evaluation.run_name,
                        run_dir: evaluation.run_dir.map(|d| d.display().to_string()),
                        duration_seconds: None,
                    });
                    tracing::info!(
                        "Trial {} finished with value {:.4}",
                        number,
                        evaluation.objective
                    );
                    status.record(&trial);
                    trials.push(trial);
                }
                Err(e) => {
                    tracing::error!("Trial {} failed: {}", number, e);
                    trial.mark_failed(e.to_string());
                    status.record(&trial);
                    trials.push(trial);

                    if !self.config.continue_on_failure {
                        status.mark_failed(e.to_string());
                        let partial = StudyReport::new(self.config.clone(), status, trials);
                        if let Err(save_err) = partial.save() {
                            tracing::warn!("Could not write partial report: {}", save_err);
                        }
                        return Err(DtError::from(StudyError::TrialFailed {
                            number,
                            message: e.to_string(),
                        }));
                    }
                }
            }
        }

        if status.best_trial.is_none() {
            let err = StudyError::NoCompletedTrials {
                study: self.config.study_name.clone(),
            };
            status.mark_failed(err.to_string());
            let report = StudyReport::new(self.config.clone(), status, trials);
            report.save()?;
            return Err(err.into());
        }

        status.mark_completed();
        let report = StudyReport::new(self.config.clone(), status, trials);
        report.save()?;

        let completed = report
            .trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .count();
        tracing::info!(
            "Study {} finished: {}/{} trials completed",
            self.config.study_name,
            completed,
            report.trials.len()
        );
        Ok(report)
    }
}
