//! Trainer collaborator: runs one training job and reports where it wrote.

use async_trait::async_trait;
use dt_types::TrainerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::run_dir::resolve_run_dir;

/// Everything the trainer needs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    /// Dataset description file.
    pub data: String,
    /// Pretrained weights or model identifier.
    pub model: String,
    pub epochs: u32,
    pub imgsz: u32,
    pub lr0: f64,
    pub batch: u32,
    pub seed: u64,
    /// Base directory under which the run directory is created.
    pub project: PathBuf,
    /// Run directory name.
    pub name: String,
}

impl TrainRequest {
    pub fn validate(&self) -> Result<(), TrainerError> {
        let problem = if self.epochs == 0 {
            Some("epochs must be positive")
        } else if self.imgsz == 0 {
            Some("imgsz must be positive")
        } else if !(self.lr0 > 0.0 && self.lr0.is_finite()) {
            Some("lr0 must be a positive number")
        } else if self.batch == 0 {
            Some("batch must be positive")
        } else if self.name.is_empty() {
            Some("run name must not be empty")
        } else {
            None
        };
        match problem {
            Some(message) => Err(TrainerError::InvalidRequest {
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Directory the run is expected to land in.
    pub fn expected_run_dir(&self) -> PathBuf {
        self.project.join(&self.name)
    }

    /// `key=value` arguments in the trainer's command-line syntax.
    pub fn to_cli_args(&self) -> Vec<String> {
        vec![
            format!("data={}", self.data),
            format!("model={}", self.model),
            format!("epochs={}", self.epochs),
            format!("imgsz={}", self.imgsz),
            format!("lr0={}", self.lr0),
            format!("batch={}", self.batch),
            format!("seed={}", self.seed),
            format!("project={}", self.project.display()),
            format!("name={}", self.name),
            "verbose=False".to_string(),
        ]
    }
}

/// What a finished training run left behind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrainOutcome {
    /// Resolved run directory, `None` when nothing could be found.
    pub run_dir: Option<PathBuf>,
}

/// Interface for components that can perform training.
///
/// Calls block the study until the run has finished; there is no timeout.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, request: &TrainRequest) -> Result<TrainOutcome, TrainerError>;

    fn name(&self) -> &str;
}

/// Marker the trainer prints once it has written its outputs.
const SAVE_MARKER: &str = "Results saved to";

/// Runs the Ultralytics `yolo` command line as a child process.
#[derive(Debug, Clone)]
pub struct UltralyticsCli {
    program: String,
    task: String,
}

impl UltralyticsCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            task: "detect".to_string(),
        }
    }

    fn command(&self, request: &TrainRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.task)
            .arg("train")
            .args(request.to_cli_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Remove terminal colour sequences (`ESC [ ... m`) from a log line.
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Directory named on a `Results saved to <dir>` line, if any.
fn saved_dir(line: &str) -> Option<PathBuf> {
    let clean = strip_ansi(line);
    let (_, rest) = clean.split_once(SAVE_MARKER)?;
    let dir = rest.trim();
    (!dir.is_empty()).then(|| PathBuf::from(dir))
}

/// Decode one raw output line. Bytes that are not UTF-8 are replaced.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Forward the stream to the log, remembering the last reported save directory.
///
/// The stream is drained to the end so the child never writes into a closed pipe.
async fn pump<R: AsyncRead + Unpin>(stream: Option<R>, run_name: &str) -> Option<PathBuf> {
    let mut segments = BufReader::new(stream?).split(b'\n');
    let mut reported = None;
    loop {
        match segments.next_segment().await {
            Ok(Some(raw)) => {
                let line = decode_line(&raw);
                tracing::info!(target: "trainer", "[{}] {}", run_name, strip_ansi(&line));
                if let Some(dir) = saved_dir(&line) {
                    reported = Some(dir);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Trainer output stream closed: {}", e);
                break;
            }
        }
    }
    reported
}

#[async_trait]
impl Trainer for UltralyticsCli {
    async fn train(&self, request: &TrainRequest) -> Result<TrainOutcome, TrainerError> {
        request.validate()?;
        tracing::info!(
            "Launching {} {} train for run {}",
            self.program,
            self.task,
            request.name
        );

        let mut child = self
            .command(request)
            .spawn()
            .map_err(|e| TrainerError::SpawnFailed {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        let (from_stdout, from_stderr) = tokio::join!(
            pump(child.stdout.take(), &request.name),
            pump(child.stderr.take(), &request.name),
        );

        let status = child.wait().await.map_err(|e| TrainerError::Output {
            message: e.to_string(),
        })?;
        if !status.success() {
            return Err(TrainerError::Exited {
                run_name: request.name.clone(),
                status: status.to_string(),
            });
        }

        let reported = from_stdout.or(from_stderr);
        let run_dir = resolve_run_dir(reported.as_deref(), &request.project, &request.name);
        Ok(TrainOutcome { run_dir })
    }

    fn name(&self) -> &str {
        "ultralytics"
    }
}
