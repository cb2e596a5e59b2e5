//! HTTP boundary over the orchestrator.
//!
//! Handlers stay free of orchestration logic: they translate requests
//! into orchestrator calls and map outcomes onto the wire shapes.
//! Every response distinguishes success and failure explicitly.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::fetch::ArtifactSource;
use crate::logs::{LogQuery, SINCE_ALL};
use crate::orchestrator::{InstanceStatus, Orchestrator, RunRequest};

/// Shared application state.
pub type AppState = Arc<Orchestrator>;

const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Builds the sandbox API router.
pub fn router(orchestrator: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sandbox/run", post(run_project))
        .route("/api/sandbox/execute", post(execute_project))
        .route("/api/sandbox/status/{id}", get(get_status))
        .route("/api/sandbox/stop/{id}", delete(stop_project))
        .route("/api/sandbox/active", get(list_active))
        .route("/api/sandbox/logs/{id}", get(get_logs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(orchestrator)
}

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub id: String,
    pub url: String,
    pub runtime: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_id: String,
    pub execution_time_ms: u128,
}

/// Run a packaged project from a remote archive URL.
async fn run_project(
    State(orchestrator): State<AppState>,
    Json(body): Json<RunBody>,
) -> (StatusCode, Json<RunResponse>) {
    let started = Instant::now();
    info!(
        "Received sandbox run request - id: {}, runtime: {}, port: {}",
        body.id, body.runtime, body.port
    );

    let outcome = async {
        let runtime = body.runtime.parse()?;
        orchestrator
            .run(RunRequest {
                id: body.id.clone(),
                source: ArtifactSource::Url(body.url.clone()),
                runtime,
                port: body.port,
            })
            .await
    }
    .await;

    let execution_time_ms = started.elapsed().as_millis();
    match outcome {
        Ok(summary) => (
            StatusCode::OK,
            Json(RunResponse {
                status: "SUCCESS",
                message: "Execution completed".to_string(),
                result: Some(summary.endpoint()),
                error: None,
                execution_id: body.id,
                execution_time_ms,
            }),
        ),
        Err(e) => {
            error!("Sandbox execution failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RunResponse {
                    status: "FAILED",
                    message: "Execution failed".to_string(),
                    result: None,
                    error: Some(e.to_string()),
                    execution_id: body.id,
                    execution_time_ms,
                }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub project_id: String,
    pub port: u16,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Run a project uploaded inline as multipart form data.
///
/// Fields: `runtime`, `port`, `project_zip` (file), optional `id`
/// (a uuid is generated when absent).
async fn execute_project(
    State(orchestrator): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExecuteResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut id = None;
    let mut runtime = None;
    let mut port = None;
    let mut archive = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        bad_request(format!("Malformed multipart body: {e}"))
    })? {
        match field.name().unwrap_or_default() {
            "id" => id = Some(field.text().await.map_err(field_error)?),
            "runtime" => runtime = Some(field.text().await.map_err(field_error)?),
            "port" => {
                let text = field.text().await.map_err(field_error)?;
                let parsed = text
                    .parse::<u16>()
                    .map_err(|_| bad_request(format!("Invalid port: {text}")))?;
                port = Some(parsed);
            }
            "project_zip" => {
                archive = Some(field.bytes().await.map_err(field_error)?.to_vec());
            }
            other => {
                return Err(bad_request(format!("Unexpected field: {other}")));
            }
        }
    }

    let runtime = runtime
        .ok_or_else(|| bad_request("Missing field: runtime".to_string()))?
        .parse()
        .map_err(|e: crate::error::SandboxError| bad_request(e.to_string()))?;
    let port = port.ok_or_else(|| bad_request("Missing field: port".to_string()))?;
    let archive = archive.ok_or_else(|| bad_request("Missing field: project_zip".to_string()))?;
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let summary = orchestrator
        .run(RunRequest {
            id: id.clone(),
            source: ArtifactSource::Bytes(archive),
            runtime,
            port,
        })
        .await
        .map_err(|e| {
            error!("Sandbox execution failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    Ok(Json(ExecuteResponse {
        project_id: summary.id,
        port: summary.port,
        url: format!("http://localhost:{}", summary.port),
    }))
}

fn bad_request(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message }))
}

fn field_error(e: axum::extract::multipart::MultipartError) -> (StatusCode, Json<ErrorResponse>) {
    bad_request(format!("Malformed multipart field: {e}"))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: String,
    pub status: &'static str,
    pub details: String,
}

/// Probe the live container state for a project id.
async fn get_status(
    Path(id): Path<String>,
    State(orchestrator): State<AppState>,
) -> (StatusCode, Json<StatusResponse>) {
    match orchestrator.status(&id).await {
        Ok(InstanceStatus::Running { details }) => (
            StatusCode::OK,
            Json(StatusResponse {
                id,
                status: "RUNNING",
                details,
            }),
        ),
        Ok(InstanceStatus::Stopped) => (
            StatusCode::OK,
            Json(StatusResponse {
                id,
                status: "STOPPED",
                details: "Container not found or stopped".to_string(),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatusResponse {
                id,
                status: "ERROR",
                details: e.to_string(),
            }),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub id: String,
    pub status: &'static str,
    pub message: String,
}

/// Stop a project's instance and release its resources.
async fn stop_project(
    Path(id): Path<String>,
    State(orchestrator): State<AppState>,
) -> Json<StopResponse> {
    info!("Received stop request for id: {}", id);
    if orchestrator.stop(&id).await {
        Json(StopResponse {
            id,
            status: "STOPPED",
            message: "Project stopped successfully".to_string(),
        })
    } else {
        Json(StopResponse {
            id,
            status: "NOT_FOUND",
            message: "No running container for this id".to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ActiveResponse {
    pub active_containers: std::collections::HashMap<String, String>,
    pub count: usize,
    pub status: &'static str,
}

/// List the registry snapshot of active instances.
async fn list_active(State(orchestrator): State<AppState>) -> Json<ActiveResponse> {
    let active_containers = orchestrator.list_active().await;
    let count = active_containers.len();
    Json(ActiveResponse {
        active_containers,
        count,
        status: "SUCCESS",
    })
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    #[serde(default = "default_lines")]
    pub lines: u32,
    #[serde(default)]
    pub follow: bool,
    #[serde(default = "default_since")]
    pub since: String,
}

fn default_lines() -> u32 {
    50
}

fn default_since() -> String {
    SINCE_ALL.to_string()
}

/// Retrieve container logs with tail/follow/since filters.
async fn get_logs(
    Path(id): Path<String>,
    Query(params): Query<LogsParams>,
    State(orchestrator): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    info!("Getting container logs - id: {}, lines: {}", id, params.lines);
    let query = LogQuery {
        lines: params.lines,
        follow: params.follow,
        since: params.since,
    };
    match orchestrator.logs(&id, &query).await {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": id,
                "status": if result.found { "SUCCESS" } else { "CONTAINER_NOT_FOUND" },
                "logs": result,
            })),
        ),
        Err(e) => {
            error!("Failed to get container logs for {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "id": id,
                    "status": "ERROR",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
