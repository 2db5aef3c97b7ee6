use thiserror::Error;

/// Main error type for the DetTune system
#[derive(Error, Debug)]
pub enum DtError {
    #[error("Trainer error: {0}")]
    Trainer(#[from] TrainerError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Study error: {0}")]
    Study(#[from] StudyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while invoking the external detection trainer
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Failed to launch trainer `{program}`: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("Trainer exited with status {status} for run {run_name}")]
    Exited { run_name: String, status: String },

    #[error("Invalid training request: {message}")]
    InvalidRequest { message: String },

    #[error("Trainer output could not be read: {message}")]
    Output { message: String },
}

/// Errors raised by the experiment-tracking backend
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("Tracking server returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {endpoint}: {message}")]
    UnexpectedResponse { endpoint: String, message: String },

    #[error("Experiment {name} exists but is deleted")]
    ExperimentDeleted { name: String },

    #[error("Unknown run: {run_id}")]
    UnknownRun { run_id: String },

    #[error("Artifact upload failed for {path}: {message}")]
    Artifact { path: String, message: String },
}

/// Errors raised by the study driver
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Invalid search space: {message}")]
    InvalidSpace { message: String },

    #[error("Parameter {name} is missing or has the wrong type in sample")]
    BadSample { name: String },

    #[error("Trial {number} failed: {message}")]
    TrialFailed { number: usize, message: String },

    #[error("Study {study} finished without a completed trial")]
    NoCompletedTrials { study: String },
}

/// Result type alias for DetTune operations
pub type DtResult<T> = Result<T, DtError>;

/// Non-fatal failures of best-effort telemetry (metric parsing, artifact
/// uploads). These are logged and dropped, never propagated to the study.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("results table {path} unreadable: {message}")]
    ResultsUnreadable { path: String, message: String },

    #[error("column {column} holds non-numeric value {value:?}")]
    NotNumeric { column: String, value: String },

    #[error("artifact {path} not logged: {message}")]
    ArtifactNotLogged { path: String, message: String },
}

/// Turns a telemetry result into an `Option`, logging the failure.
pub trait BestEffort<T> {
    fn best_effort(self) -> Option<T>;
}

impl<T> BestEffort<T> for Result<T, TelemetryError> {
    fn best_effort(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("best-effort telemetry skipped: {}", e);
                None
            }
        }
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::DtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::DtError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TrackingError::Status {
            endpoint: "runs/create".to_string(),
            status: 404,
            body: "RESOURCE_DOES_NOT_EXIST".to_string(),
        };

        assert!(error.to_string().contains("404"));
        assert!(error.to_string().contains("runs/create"));
    }

    #[test]
    fn test_error_conversion() {
        let trainer_error = TrainerError::Exited {
            run_name: "trial_0".to_string(),
            status: "exit status: 1".to_string(),
        };
        let dt_error: DtError = trainer_error.into();

        match dt_error {
            DtError::Trainer(_) => (),
            _ => panic!("Expected Trainer error"),
        }
    }

    #[test]
    fn test_best_effort_drops_errors() {
        let ok: Result<u32, TelemetryError> = Ok(3);
        assert_eq!(ok.best_effort(), Some(3));

        let failed: Result<u32, TelemetryError> = Err(TelemetryError::NotNumeric {
            column: "metrics/mAP50(B)".to_string(),
            value: "n/a".to_string(),
        });
        assert_eq!(failed.best_effort(), None);
    }

    #[test]
    fn test_macros() {
        let err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(err, DtError::Validation(ref m) if m == "Invalid value: 42"));
        let err = config_error!("Missing required field: {}", "data");
        assert!(matches!(err, DtError::Config(ref m) if m.ends_with("data")));
    }
}
