//! Trial tracking and study status management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::search::ParameterSample;

/// Unique study identifier.
pub type StudyId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

/// Lifecycle state for a study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyStatus {
    pub id: StudyId,
    pub name: String,
    pub direction: ObjectiveDirection,
    pub state: StudyState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StudyStatus {
    pub fn new(name: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            direction,
            state: StudyState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = StudyState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = StudyState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = StudyState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Count a finished trial and keep it as best if it strictly improves on
    /// the current best. Ties keep the earlier trial.
    pub fn record(&mut self, trial: &Trial) {
        match (&trial.status, &trial.result) {
            (TrialStatus::Completed, Some(result)) => {
                self.trials_completed += 1;
                self.update_best(result);
            }
            (TrialStatus::Failed, _) => self.trials_failed += 1,
            _ => {}
        }
    }

    fn update_best(&mut self, result: &TrialResult) {
        let improves = match &self.best_trial {
            None => true,
            Some(current_best) => match self.direction {
                ObjectiveDirection::Maximize => result.objective > current_best.objective,
                ObjectiveDirection::Minimize => result.objective < current_best.objective,
            },
        };
        if improves {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one parameter sample evaluated by one training run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub study_id: StudyId,
    pub number: usize,
    pub parameters: ParameterSample,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(study_id: StudyId, number: usize, parameters: ParameterSample) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, mut result: TrialResult) {
        let finished = Utc::now();
        if let Some(started) = self.started_at {
            result.duration_seconds =
                Some((finished - started).num_milliseconds() as f64 / 1000.0);
        }
        self.status = TrialStatus::Completed;
        self.finished_at = Some(finished);
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Objective value, present only for completed trials.
    pub fn value(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.objective)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TrialStatus {
    /// Upper-case label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETE",
            Self::Failed => "FAIL",
        }
    }
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_number: usize,
    pub objective: f64,
    pub metrics: BTreeMap<String, f64>,
    pub parameters: ParameterSample,
    pub run_name: String,
    pub run_dir: Option<String>,
    pub duration_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParameterValue;

    fn result(number: usize, objective: f64) -> TrialResult {
        TrialResult {
            trial_number: number,
            objective,
            metrics: BTreeMap::new(),
            parameters: ParameterSample::new(),
            run_name: format!("trial_{number}"),
            run_dir: None,
            duration_seconds: None,
        }
    }

    fn completed(study_id: StudyId, number: usize, objective: f64) -> Trial {
        let mut trial = Trial::new(study_id, number, ParameterSample::new());
        trial.mark_running();
        trial.mark_completed(result(number, objective));
        trial
    }

    #[test]
    fn study_status_lifecycle() {
        let mut status = StudyStatus::new("yolo_study", ObjectiveDirection::Maximize);

        assert_eq!(status.state, StudyState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, StudyState::Running);
        assert!(status.started_at.is_some());

        status.mark_completed();
        assert_eq!(status.state, StudyState::Completed);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut status = StudyStatus::new("max", ObjectiveDirection::Maximize);

        status.record(&completed(status.id, 0, 0.41));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 0);

        status.record(&completed(status.id, 1, 0.55));
        assert_eq!(status.best_trial.as_ref().unwrap().objective, 0.55);

        // Worse result should not replace
        status.record(&completed(status.id, 2, 0.30));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 1);
        assert_eq!(status.trials_completed, 3);
    }

    #[test]
    fn ties_keep_the_earlier_trial() {
        let mut status = StudyStatus::new("ties", ObjectiveDirection::Maximize);
        status.record(&completed(status.id, 0, 0.0));
        status.record(&completed(status.id, 1, 0.0));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 0);
    }

    #[test]
    fn best_trial_tracking_minimize() {
        let mut status = StudyStatus::new("min", ObjectiveDirection::Minimize);
        status.record(&completed(status.id, 0, 0.15));
        status.record(&completed(status.id, 1, 0.05));
        assert_eq!(status.best_trial.as_ref().unwrap().objective, 0.05);
    }

    #[test]
    fn trial_lifecycle() {
        let mut params = ParameterSample::new();
        params.insert("epochs".into(), ParameterValue::Int(4));

        let mut trial = Trial::new(Uuid::new_v4(), 1, params.clone());
        assert_eq!(trial.status, TrialStatus::Pending);
        assert_eq!(trial.value(), None);

        trial.mark_running();
        assert_eq!(trial.status, TrialStatus::Running);

        trial.mark_completed(result(1, 0.6));
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert_eq!(trial.value(), Some(0.6));
        assert!(trial.result.as_ref().unwrap().duration_seconds.is_some());
    }

    #[test]
    fn failed_trials_are_counted_but_never_best() {
        let mut status = StudyStatus::new("fail", ObjectiveDirection::Maximize);
        let mut trial = Trial::new(status.id, 0, ParameterSample::new());
        trial.mark_running();
        trial.mark_failed("trainer exited with status 1".into());
        status.record(&trial);

        assert_eq!(trial.status.label(), "FAIL");
        assert_eq!(trial.error.as_deref(), Some("trainer exited with status 1"));
        assert_eq!(status.trials_failed, 1);
        assert!(status.best_trial.is_none());
    }
}
