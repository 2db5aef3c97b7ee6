//! MLflow tracking server client (REST API 2.0).

use async_trait::async_trait;
use chrono::Utc;
use dt_types::TrackingError;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::{KeyValue, RunHandle, RunStatus, TrackingBackend, TrackingResult};

/// Environment variable that overrides the tracking server address.
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";

/// Tracking server address used when nothing else is configured.
pub const DEFAULT_TRACKING_URI: &str = "http://localhost:5000";

const ARTIFACT_PROXY_SCHEME: &str = "mlflow-artifacts:";
const NOT_FOUND_CODE: &str = "RESOURCE_DOES_NOT_EXIST";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
    #[serde(default)]
    lifecycle_stage: String,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Serialize)]
struct CreateExperimentRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Serialize)]
struct Tag<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct Param<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    experiment_id: &'a str,
    run_name: &'a str,
    start_time: i64,
    tags: Vec<Tag<'a>>,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    artifact_uri: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: Run,
}

#[derive(Debug, Serialize)]
struct LogBatchRequest<'a> {
    run_id: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    params: Vec<Param<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<Tag<'a>>,
}

#[derive(Debug, Serialize)]
struct LogMetricRequest<'a> {
    run_id: &'a str,
    key: &'a str,
    value: f64,
    timestamp: i64,
    step: i64,
}

#[derive(Debug, Serialize)]
struct UpdateRunRequest<'a> {
    run_id: &'a str,
    status: &'a str,
    end_time: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Where an artifact should be written for a given run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactTarget {
    /// Upload through the server's artifact proxy; holds the path after the scheme.
    Proxy(String),
    /// Artifact store is a directory the client can write to.
    Local(PathBuf),
}

fn artifact_target(artifact_uri: &str) -> TrackingResult<ArtifactTarget> {
    if let Some(rest) = artifact_uri.strip_prefix(ARTIFACT_PROXY_SCHEME) {
        // `mlflow-artifacts://host:port/path` carries an authority we don't need.
        let path = match rest.strip_prefix("//") {
            Some(with_authority) => with_authority
                .split_once('/')
                .map(|(_, p)| p)
                .unwrap_or(""),
            None => rest,
        };
        return Ok(ArtifactTarget::Proxy(path.trim_matches('/').to_string()));
    }
    if let Some(path) = artifact_uri.strip_prefix("file://") {
        return Ok(ArtifactTarget::Local(PathBuf::from(path)));
    }
    if !artifact_uri.contains("://") && !artifact_uri.is_empty() {
        return Ok(ArtifactTarget::Local(PathBuf::from(artifact_uri)));
    }
    Err(TrackingError::Artifact {
        path: artifact_uri.to_string(),
        message: "unsupported artifact store".to_string(),
    })
}

/// Client for an MLflow tracking server.
#[derive(Debug, Clone)]
pub struct MlflowClient {
    base_url: String,
    client: reqwest::Client,
}

impl MlflowClient {
    pub fn new(tracking_uri: impl Into<String>) -> Self {
        let uri: String = tracking_uri.into();
        Self {
            base_url: uri.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    async fn decode<R: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> TrackingResult<R> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackingError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|e| TrackingError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })
    }

    async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> TrackingResult<R> {
        let url = self.endpoint(path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| TrackingError::Request {
                endpoint: url.clone(),
                message: e.to_string(),
            })?;
        Self::decode(&url, response).await
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> TrackingResult<R> {
        let url = self.endpoint(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TrackingError::Request {
                endpoint: url.clone(),
                message: e.to_string(),
            })?;
        Self::decode(&url, response).await
    }

    async fn upload_via_proxy(
        &self,
        root: &str,
        local_path: &Path,
        artifact_path: &str,
        file_name: &str,
    ) -> TrackingResult<()> {
        let url = format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}/{}",
            self.base_url, root, artifact_path, file_name
        );
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| TrackingError::Artifact {
                path: local_path.display().to_string(),
                message: e.to_string(),
            })?;
        let response = self
            .client
            .put(&url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| TrackingError::Request {
                endpoint: url.clone(),
                message: e.to_string(),
            })?;
        Self::decode::<IgnoredAny>(&url, response).await.map(|_| ())
    }
}

async fn copy_to_store(
    root: &Path,
    local_path: &Path,
    artifact_path: &str,
    file_name: &str,
) -> TrackingResult<()> {
    let dest_dir = root.join(artifact_path);
    let artifact_err = |e: std::io::Error| TrackingError::Artifact {
        path: local_path.display().to_string(),
        message: e.to_string(),
    };
    tokio::fs::create_dir_all(&dest_dir).await.map_err(artifact_err)?;
    tokio::fs::copy(local_path, dest_dir.join(file_name))
        .await
        .map_err(artifact_err)?;
    Ok(())
}

#[async_trait]
impl TrackingBackend for MlflowClient {
    async fn ensure_experiment(&self, name: &str) -> TrackingResult<String> {
        let lookup = self
            .get::<GetExperimentResponse>("experiments/get-by-name", &[("experiment_name", name)])
            .await;

        match lookup {
            Ok(found) if found.experiment.lifecycle_stage == "deleted" => {
                Err(TrackingError::ExperimentDeleted {
                    name: name.to_string(),
                })
            }
            Ok(found) => Ok(found.experiment.experiment_id),
            Err(TrackingError::Status { body, .. }) if body.contains(NOT_FOUND_CODE) => {
                tracing::info!("Creating tracking experiment {}", name);
                let created: CreateExperimentResponse = self
                    .post("experiments/create", &CreateExperimentRequest { name })
                    .await?;
                Ok(created.experiment_id)
            }
            Err(e) => Err(e),
        }
    }

    async fn start_run(&self, experiment_id: &str, run_name: &str) -> TrackingResult<RunHandle> {
        let request = CreateRunRequest {
            experiment_id,
            run_name,
            start_time: Utc::now().timestamp_millis(),
            tags: vec![Tag {
                key: "mlflow.runName",
                value: run_name,
            }],
        };
        let created: CreateRunResponse = self.post("runs/create", &request).await?;
        tracing::debug!("Started tracking run {} ({})", run_name, created.run.info.run_id);

        Ok(RunHandle {
            run_id: created.run.info.run_id,
            experiment_id: created.run.info.experiment_id,
            run_name: run_name.to_string(),
            artifact_uri: created.run.info.artifact_uri,
        })
    }

    async fn log_params(&self, run: &RunHandle, params: &[KeyValue]) -> TrackingResult<()> {
        if params.is_empty() {
            return Ok(());
        }
        let request = LogBatchRequest {
            run_id: &run.run_id,
            params: params
                .iter()
                .map(|(k, v)| Param { key: k, value: v })
                .collect(),
            tags: Vec::new(),
        };
        self.post::<_, IgnoredAny>("runs/log-batch", &request).await?;
        Ok(())
    }

    async fn set_tags(&self, run: &RunHandle, tags: &[KeyValue]) -> TrackingResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let request = LogBatchRequest {
            run_id: &run.run_id,
            params: Vec::new(),
            tags: tags.iter().map(|(k, v)| Tag { key: k, value: v }).collect(),
        };
        self.post::<_, IgnoredAny>("runs/log-batch", &request).await?;
        Ok(())
    }

    async fn log_metric(&self, run: &RunHandle, key: &str, value: f64) -> TrackingResult<()> {
        let request = LogMetricRequest {
            run_id: &run.run_id,
            key,
            value,
            timestamp: Utc::now().timestamp_millis(),
            step: 0,
        };
        self.post::<_, IgnoredAny>("runs/log-metric", &request).await?;
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        local_path: &Path,
        artifact_path: &str,
    ) -> TrackingResult<()> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| TrackingError::Artifact {
                path: local_path.display().to_string(),
                message: "path has no file name".to_string(),
            })?;

        match artifact_target(&run.artifact_uri)? {
            ArtifactTarget::Proxy(root) => {
                self.upload_via_proxy(&root, local_path, artifact_path, &file_name)
                    .await
            }
            ArtifactTarget::Local(root) => {
                copy_to_store(&root, local_path, artifact_path, &file_name).await
            }
        }
    }

    async fn end_run(&self, run: &RunHandle, status: RunStatus) -> TrackingResult<()> {
        let request = UpdateRunRequest {
            run_id: &run.run_id,
            status: status.as_str(),
            end_time: Utc::now().timestamp_millis(),
        };
        self.post::<_, IgnoredAny>("runs/update", &request).await?;
        Ok(())
    }

    fn uri(&self) -> &str {
        &self.base_url
    }
}
