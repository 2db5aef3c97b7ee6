//! Study report: a results table plus a JSON summary.

use chrono::{DateTime, SecondsFormat, Utc};
use dt_optimizer::{StudyStatus, Trial, TrialResult};
use dt_types::DtResult;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::config::StudyConfig;

/// Everything a study produced.
#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub config: StudyConfig,
    pub status: StudyStatus,
    pub trials: Vec<Trial>,
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

impl StudyReport {
    pub fn new(config: StudyConfig, status: StudyStatus, trials: Vec<Trial>) -> Self {
        Self {
            config,
            status,
            trials,
        }
    }

    pub fn best(&self) -> Option<&TrialResult> {
        self.status.best_trial.as_ref()
    }

    /// Union of parameter names over all trials, sorted.
    fn param_names(&self) -> Vec<String> {
        self.trials
            .iter()
            .flat_map(|t| t.parameters.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// One row per trial in trial order.
    pub fn write_csv<W: Write>(&self, writer: W) -> DtResult<()> {
        let params = self.param_names();
        let mut out = csv::Writer::from_writer(writer);

        let mut header: Vec<String> = vec![
            "number".into(),
            "value".into(),
            "datetime_start".into(),
            "datetime_complete".into(),
            "duration_seconds".into(),
        ];
        header.extend(params.iter().map(|p| format!("params_{p}")));
        header.push("run_name".into());
        header.push("state".into());
        out.write_record(&header)?;

        for trial in &self.trials {
            let mut row = vec![
                trial.number.to_string(),
                trial.value().map(|v| v.to_string()).unwrap_or_default(),
                timestamp(trial.started_at),
                timestamp(trial.finished_at),
                trial
                    .duration_seconds()
                    .map(|d| format!("{d:.3}"))
                    .unwrap_or_default(),
            ];
            for name in &params {
                row.push(
                    trial
                        .parameters
                        .get(name)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            row.push(
                trial
                    .result
                    .as_ref()
                    .map(|r| r.run_name.clone())
                    .unwrap_or_default(),
            );
            row.push(trial.status.label().to_string());
            out.write_record(&row)?;
        }

        out.flush()?;
        Ok(())
    }

    /// Write the results table and summary under the reports directory.
    /// Returns the path of the results table.
    pub fn save(&self) -> DtResult<PathBuf> {
        fs::create_dir_all(&self.config.reports_dir)?;

        let results_path = self.config.results_path();
        let file = fs::File::create(&results_path)?;
        self.write_csv(file)?;

        let summary = serde_json::to_string_pretty(self)?;
        fs::write(self.config.summary_path(), summary)?;

        tracing::info!("Study results written to {}", results_path.display());
        Ok(results_path)
    }
}

impl fmt::Display for StudyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Study {}: {} completed, {} failed",
            self.status.name, self.status.trials_completed, self.status.trials_failed
        )?;
        match self.best() {
            Some(best) => {
                writeln!(f, "Best trial: {}", best.trial_number)?;
                writeln!(f, "  Value (mAP50): {}", best.objective)?;
                writeln!(f, "  Params:")?;
                for (name, value) in &best.parameters {
                    writeln!(f, "    {name}: {value}")?;
                }
            }
            None => writeln!(f, "No completed trials")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunSettings;
    use dt_optimizer::{ObjectiveDirection, ParameterSample, ParameterValue};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample(epochs: i64, lr0: f64) -> ParameterSample {
        let mut s = ParameterSample::new();
        s.insert("epochs".into(), ParameterValue::Int(epochs));
        s.insert("imgsz".into(), ParameterValue::Json(serde_json::json!(320)));
        s.insert("lr0".into(), ParameterValue::Float(lr0));
        s
    }

    fn report(dir: &TempDir) -> StudyReport {
        let config = StudyConfig::new("unit_study", RunSettings::default())
            .with_reports_dir(dir.path().join("reports"));
        let mut status = StudyStatus::new("unit_study", ObjectiveDirection::Maximize);
        status.mark_running();

        let mut done = Trial::new(status.id, 0, sample(3, 0.002));
        done.mark_running();
        done.mark_completed(TrialResult {
            trial_number: 0,
            objective: 0.61,
            metrics: BTreeMap::new(),
            parameters: done.parameters.clone(),
            run_name: "yolo_trial_0_e3_sz320_lr0.0020".into(),
            run_dir: None,
            duration_seconds: None,
        });
        status.record(&done);

        let mut failed = Trial::new(status.id, 1, sample(5, 0.009));
        failed.mark_running();
        failed.mark_failed("trainer exited".into());
        status.record(&failed);
        status.mark_completed();

        StudyReport::new(config, status, vec![done, failed])
    }

    #[test]
    fn csv_has_one_row_per_trial() {
        let dir = TempDir::new().unwrap();
        let mut buf = Vec::new();
        report(&dir).write_csv(&mut buf).unwrap();

        let mut rows = csv::Reader::from_reader(buf.as_slice());
        let header: Vec<String> = rows.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            header,
            vec![
                "number",
                "value",
                "datetime_start",
                "datetime_complete",
                "duration_seconds",
                "params_epochs",
                "params_imgsz",
                "params_lr0",
                "run_name",
                "state"
            ]
        );

        let records: Vec<csv::StringRecord> = rows.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "0.61");
        assert_eq!(&records[0][5], "3");
        assert_eq!(&records[0][6], "320");
        assert_eq!(&records[0][9], "COMPLETE");
        assert_eq!(&records[1][1], "");
        assert_eq!(&records[1][8], "");
        assert_eq!(&records[1][9], "FAIL");
    }

    #[test]
    fn save_writes_table_and_summary() {
        let dir = TempDir::new().unwrap();
        let report = report(&dir);
        let path = report.save().unwrap();

        assert_eq!(path, dir.path().join("reports").join("unit_study_results.csv"));
        assert!(path.is_file());

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(report.config.summary_path()).unwrap())
                .unwrap();
        assert_eq!(summary["status"]["best_trial"]["trial_number"], 0);
        assert_eq!(summary["status"]["trials_failed"], 1);
    }

    #[test]
    fn display_names_the_best_trial() {
        let dir = TempDir::new().unwrap();
        let text = report(&dir).to_string();
        assert!(text.contains("Best trial: 0"));
        assert!(text.contains("Value (mAP50): 0.61"));
        assert!(text.contains("lr0: 0.002"));
    }
}
