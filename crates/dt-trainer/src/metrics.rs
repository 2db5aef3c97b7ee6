//! Final-epoch metrics from the trainer's results table.
//!
//! Column names drifted across trainer releases, so every canonical metric
//! maps to an ordered list of historical column names and the first numeric
//! match wins.

use dt_types::{BestEffort, TelemetryError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Results table written by the trainer into each run directory.
pub const RESULTS_FILE: &str = "results.csv";

/// Canonical detection metrics extracted from a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DetectionMetric {
    Precision,
    Recall,
    Map50,
    Map50_95,
}

impl DetectionMetric {
    pub const ALL: [DetectionMetric; 4] = [
        DetectionMetric::Precision,
        DetectionMetric::Recall,
        DetectionMetric::Map50,
        DetectionMetric::Map50_95,
    ];

    /// Name used when logging the metric.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::Map50 => "mAP50",
            Self::Map50_95 => "mAP50-95",
        }
    }

    /// Known column names, current first.
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Precision => &["metrics/precision(B)", "metrics/precision"],
            Self::Recall => &["metrics/recall(B)", "metrics/recall"],
            Self::Map50 => &["metrics/mAP50(B)", "metrics/mAP50"],
            Self::Map50_95 => &[
                "metrics/mAP50-95(B)",
                "metrics/mAP50-95",
                "metrics/mAP50-95(M)",
            ],
        }
    }
}

impl std::fmt::Display for DetectionMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Metrics found for one run. Missing metrics are absent, never defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord(BTreeMap<DetectionMetric, f64>);

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: DetectionMetric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn insert(&mut self, metric: DetectionMetric, value: f64) {
        self.0.insert(metric, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (DetectionMetric, f64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keyed by logging name, for reports.
    pub fn to_named(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(m, v)| (m.key().to_string(), v)).collect()
    }
}

fn parse_cell(column: &str, raw: &str) -> Result<f64, TelemetryError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(TelemetryError::NotNumeric {
            column: column.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Map one results row (column name to cell) onto canonical metrics.
pub fn normalize_row(row: &HashMap<String, String>) -> MetricsRecord {
    let mut record = MetricsRecord::new();
    for metric in DetectionMetric::ALL {
        for column in metric.candidates() {
            let Some(raw) = row.get(*column) else {
                continue;
            };
            match parse_cell(column, raw) {
                Ok(value) => {
                    record.insert(metric, value);
                    break;
                }
                Err(e) => tracing::debug!("{}: {}", metric, e),
            }
        }
    }
    record
}

/// Read the last data row of a results table. `Ok(None)` when the table has
/// a header but no rows.
fn read_last_row(path: &Path) -> Result<Option<HashMap<String, String>>, TelemetryError> {
    let unreadable = |e: csv::Error| TelemetryError::ResultsUnreadable {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(unreadable)?;
    let headers = reader.headers().map_err(unreadable)?.clone();

    let mut last = None;
    for record in reader.records() {
        last = Some(record.map_err(unreadable)?);
    }

    Ok(last.map(|record| {
        headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect()
    }))
}

/// Final metrics for a run directory. Missing or unreadable results yield an
/// empty record.
pub fn extract_metrics(run_dir: &Path) -> MetricsRecord {
    let path = run_dir.join(RESULTS_FILE);
    if !path.is_file() {
        tracing::debug!("No results table at {}", path.display());
        return MetricsRecord::new();
    }

    match read_last_row(&path).best_effort().flatten() {
        Some(row) => normalize_row(&row),
        None => MetricsRecord::new(),
    }
}
