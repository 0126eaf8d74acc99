//! HTTP surface for Docsmith.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /upload?filename=<name>&model=<model>` – Store the raw request body as an upload and
//!   start a job for it. The upload is removed once its documentation is saved.
//! - `POST /jobs` – Start a job for a file already present on the server.
//! - `GET /jobs/{id}` – Poll the status payload of a job.
//! - `GET /task-status/{id}` – Server-sent events with one `data:` line per status change and a
//!   heartbeat every `STREAM_INTERVAL_SECS`; the stream ends after the terminal state.
//! - `DELETE /jobs/{id}` – Cancel a running job (`202`) or forget a finished one (`204`).
//! - `GET /download/{id}` – Download the generated documentation.
//! - `GET /metrics`, `GET /models`, `GET /commands` – Counters, accepted model names and a
//!   machine-readable command catalog.

use crate::metrics::MetricsSnapshot;
use crate::processing::sanitize::{sanitize_filename, sanitize_string};
use crate::processing::{CancelOutcome, JobRequest, JobStatus, PipelineApi, PipelineError};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Router settings that do not belong to the pipeline itself.
#[derive(Debug, Clone)]
pub struct ApiOptions {
    /// Directory uploads are stored in until processed.
    pub upload_folder: PathBuf,
    /// Heartbeat cadence of the status stream.
    pub stream_interval: Duration,
    /// Longest a status stream stays open.
    pub stream_limit: Duration,
}

struct AppState<S> {
    service: Arc<S>,
    options: Arc<ApiOptions>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            options: self.options.clone(),
        }
    }
}

/// Build the HTTP router exposing the pipeline.
pub fn create_router<S>(service: Arc<S>, options: ApiOptions) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/upload", post(upload_document::<S>))
        .route("/jobs", post(submit_job::<S>))
        .route("/jobs/:id", get(get_job::<S>).delete(delete_job::<S>))
        .route("/task-status/:id", get(stream_status::<S>))
        .route("/download/:id", get(download_artifact::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/models", get(list_models::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(AppState {
            service,
            options: Arc::new(options),
        })
}

/// Response for accepted submissions.
#[derive(Serialize)]
struct TaskStarted {
    message: &'static str,
    task_id: String,
}

fn accepted(task_id: String) -> (StatusCode, Json<TaskStarted>) {
    (
        StatusCode::ACCEPTED,
        Json(TaskStarted {
            message: "Task started",
            task_id,
        }),
    )
}

/// Query string of `POST /upload`.
#[derive(Deserialize)]
struct UploadParams {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// Save the uploaded document and start processing it.
async fn upload_document<S>(
    State(state): State<AppState<S>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<TaskStarted>), AppError>
where
    S: PipelineApi,
{
    let filename = params
        .filename
        .as_deref()
        .and_then(sanitize_filename)
        .ok_or_else(|| AppError::bad_request("No selected file"))?;
    let model = sanitize_string(params.model)
        .ok_or_else(|| AppError::bad_request("A model name is required"))?;
    if body.is_empty() {
        return Err(AppError::bad_request("Uploaded file is empty"));
    }

    let folder = &state.options.upload_folder;
    tokio::fs::create_dir_all(folder)
        .await
        .map_err(AppError::internal)?;
    let stored = folder.join(format!("{}-{filename}", Uuid::new_v4().simple()));
    tokio::fs::write(&stored, &body)
        .await
        .map_err(AppError::internal)?;
    tracing::info!(
        filename = %filename,
        bytes = body.len(),
        path = %stored.display(),
        "Upload stored"
    );

    let request = JobRequest {
        original_filename: Some(filename),
        remove_input_on_success: true,
        ..JobRequest::new(&stored, model)
    };
    match state.service.submit(request).await {
        Ok(task_id) => Ok(accepted(task_id)),
        Err(error) => {
            if let Err(remove_error) = tokio::fs::remove_file(&stored).await {
                tracing::warn!(
                    path = %stored.display(),
                    error = %remove_error,
                    "Failed to remove rejected upload"
                );
            }
            Err(error.into())
        }
    }
}

/// Request body for `POST /jobs`.
#[derive(Deserialize)]
struct SubmitJobRequest {
    /// Server-side path of the document.
    input_path: PathBuf,
    /// Model to run every chunk through.
    model_name: String,
}

/// Start a job for a file already present on the server.
async fn submit_job<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<TaskStarted>), AppError>
where
    S: PipelineApi,
{
    let task_id = state
        .service
        .submit(JobRequest::new(request.input_path, request.model_name))
        .await?;
    Ok(accepted(task_id))
}

/// Return the latest status of a job.
async fn get_job<S>(
    State(state): State<AppState<S>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(state.service.status(&job_id)?))
}

/// Cancel a running job or forget a finished one.
async fn delete_job<S>(
    State(state): State<AppState<S>>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, AppError>
where
    S: PipelineApi,
{
    let status = match state.service.cancel_or_forget(&job_id).await? {
        CancelOutcome::Cancelled => StatusCode::ACCEPTED,
        CancelOutcome::Forgotten => StatusCode::NO_CONTENT,
    };
    Ok(status)
}

/// Stream status changes as server-sent events until the job finishes.
async fn stream_status<S>(
    State(state): State<AppState<S>>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError>
where
    S: PipelineApi,
{
    let mut receiver = state.service.subscribe(&job_id)?;
    let heartbeat = state.options.stream_interval;
    let deadline = tokio::time::Instant::now() + state.options.stream_limit;

    let stream = async_stream::stream! {
        loop {
            let status = receiver.borrow_and_update().clone();
            let finished = status.state.is_terminal();
            yield Ok::<Event, Infallible>(status_event(&status));
            if finished {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(job_id = %job_id, "Status stream reached its time limit");
                yield Ok(Event::default().event("timeout").data("status stream limit reached"));
                break;
            }
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(heartbeat) => {}
            }
        }
    };

    Ok(Sse::new(stream))
}

fn status_event(status: &JobStatus) -> Event {
    Event::default()
        .json_data(status)
        .unwrap_or_else(|error| Event::default().event("error").data(error.to_string()))
}

/// Download the documentation produced by a successful job.
async fn download_artifact<S>(
    State(state): State<AppState<S>>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError>
where
    S: PipelineApi,
{
    let path = state
        .service
        .artifact_path(&job_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No documentation available for {job_id}")))?;
    let content = tokio::fs::read(&path).await.map_err(AppError::internal)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{job_id}.md"));

    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        content,
    )
        .into_response())
}

/// Return pipeline counters.
async fn get_metrics<S>(State(state): State<AppState<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(state.service.metrics_snapshot())
}

/// Response body for `GET /models`.
#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// List model names accepted on submission.
async fn list_models<S>(State(state): State<AppState<S>>) -> Json<ModelsResponse>
where
    S: PipelineApi,
{
    Json(ModelsResponse {
        models: state.service.model_names(),
    })
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery by tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/upload?filename=<name>&model=<model>",
                description: "Upload a document as the raw request body and start generating its documentation. Returns { \"message\": \"Task started\", \"task_id\": string }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "submit",
                method: "POST",
                path: "/jobs",
                description: "Start a job for a document already stored on the server.",
                request_example: Some(json!({
                    "input_path": "uploads/handbook.txt",
                    "model_name": "gpt4"
                })),
            },
            CommandDescriptor {
                name: "status",
                method: "GET",
                path: "/jobs/{id}",
                description: "Return { state, current, total, status, result?, reason? } for a job.",
                request_example: None,
            },
            CommandDescriptor {
                name: "stream_status",
                method: "GET",
                path: "/task-status/{id}",
                description: "Server-sent events with the job status until it reaches SUCCESS or FAILURE.",
                request_example: None,
            },
            CommandDescriptor {
                name: "cancel",
                method: "DELETE",
                path: "/jobs/{id}",
                description: "Cancel a running job, or forget a finished one.",
                request_example: None,
            },
            CommandDescriptor {
                name: "download",
                method: "GET",
                path: "/download/{id}",
                description: "Download the Markdown documentation produced by a successful job.",
                request_example: None,
            },
            CommandDescriptor {
                name: "models",
                method: "GET",
                path: "/models",
                description: "List the model names accepted on submission.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return job, chunk and retry counters.",
                request_example: None,
            },
        ],
    })
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        let status = match &inner {
            PipelineError::UnsupportedModel(_) | PipelineError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::UnknownJob(_) => StatusCode::NOT_FOUND,
            PipelineError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: inner.to_string(),
        }
    }
}
