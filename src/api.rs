use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::value::RawValue;
use stager_common::{EnvironmentVariable, Lifecycle, StagingRequest};
use tracing::{debug, error, warn};

use crate::errors::{ErrorKind, StagingError};
use crate::staging::StagingOrchestrator;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub staging: StagingOrchestrator,
    /// Tenant used when a request omits `space`
    pub default_tenant: String,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    fn tenant(&self, space: Option<String>) -> String {
        match space {
            Some(space) if !space.is_empty() => space,
            _ => self.default_tenant.clone(),
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StageRequestBody {
    #[serde(default)]
    pub space: Option<String>,
    pub lifecycle: String,
    #[serde(default)]
    pub lifecycle_data: serde_json::Value,
    #[serde(default)]
    pub environment: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub completion_callback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StagingCompleteBody {
    #[serde(default)]
    pub task_guid: Option<String>,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
}

#[derive(Debug, Deserialize)]
pub struct StopStagingQuery {
    #[serde(default)]
    pub space: Option<String>,
    /// Seconds; the configured default applies when absent
    #[serde(default)]
    pub grace_period: Option<u64>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    NotFound(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<StagingError> for ApiError {
    fn from(err: StagingError) -> Self {
        let msg = err.to_string();
        match err.kind() {
            ErrorKind::Client | ErrorKind::CompletionRejected => ApiError::BadRequest(msg),
            ErrorKind::Conflict => ApiError::Conflict(msg),
            ErrorKind::NotFound => ApiError::NotFound(msg),
            ErrorKind::CompletionUnavailable => ApiError::ServiceUnavailable(msg),
            ErrorKind::Infrastructure => {
                error!(error = %msg, "staging request failed");
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/v1/staging/{staging_guid}",
            put(stage).delete(stop_staging),
        )
        .route("/v1/staging/{staging_guid}/completed", post(staging_complete))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn stage(
    State(state): State<SharedState>,
    Path(staging_guid): Path<String>,
    body: Result<Json<StageRequestBody>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body?;
    let tenant = state.tenant(body.space);
    debug!(staging_id = %staging_guid, tenant = %tenant, lifecycle = %body.lifecycle, "stage requested");

    let lifecycle = Lifecycle::decode(&body.lifecycle, body.lifecycle_data).map_err(|e| {
        warn!(staging_id = %staging_guid, error = %e, "rejected staging lifecycle");
        StagingError::from(e)
    })?;

    let mut request =
        StagingRequest::new(staging_guid, tenant, lifecycle).with_environment(body.environment);
    if let Some(callback) = body.completion_callback {
        request = request.with_completion_callback(callback);
    }

    state.staging.start_staging(request).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn staging_complete(
    State(state): State<SharedState>,
    Path(staging_guid): Path<String>,
    body: Result<Json<StagingCompleteBody>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body?;
    let tenant = state.tenant(body.space);
    if body.task_guid.as_deref().is_some_and(|g| g != staging_guid) {
        debug!(staging_id = %staging_guid, task_guid = ?body.task_guid, "completion task guid differs from path");
    }

    match state
        .staging
        .report_completion(&staging_guid, &tenant, result_payload(body.result))
        .await
    {
        Ok(()) => Ok(StatusCode::OK),
        // Teardown failed after the callback: the caller should retry
        Err(e) if e.kind() == ErrorKind::Infrastructure => {
            error!(staging_id = %staging_guid, error = %e, "staging teardown failed");
            Err(ApiError::ServiceUnavailable(e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn stop_staging(
    State(state): State<SharedState>,
    Path(staging_guid): Path<String>,
    query: Result<Query<StopStagingQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Query(query) = query?;
    let tenant = state.tenant(query.space);
    let grace = query.grace_period.map(Duration::from_secs);

    state
        .staging
        .stop_staging(&staging_guid, &tenant, grace)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Staging tasks send their result as a JSON document encoded in a string.
/// Unwrap the string so the control plane receives the document text as sent.
/// Anything else is passed on untouched.
fn result_payload(result: Option<Box<RawValue>>) -> Box<RawValue> {
    let Some(result) = result else {
        return RawValue::NULL.to_owned();
    };
    match serde_json::from_str::<String>(result.get()) {
        Ok(text) => RawValue::from_string(text).unwrap_or(result),
        Err(_) => result,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
