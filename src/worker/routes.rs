//! REST endpoints for workers and the executor.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::error::{GenerationError, LifecycleError};

use super::lifecycle::WorkerLifecycleManager;
use super::model::{ExecutionReport, ExecutionStatus, NewWorker, WorkerType};

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";

/// Shared state for worker routes.
#[derive(Clone)]
pub struct WorkerRouteState {
    pub manager: Arc<WorkerLifecycleManager>,
    /// Bearer token the executor presents on `/api/executor/*`.
    /// Those routes refuse every request when unset.
    pub executor_token: Option<SecretString>,
}

/// The authenticated caller, taken from [`USER_HEADER`].
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Proof that the caller presented the executor's bearer token.
pub struct ExecutorAuth;

impl FromRequestParts<WorkerRouteState> for ExecutorAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &WorkerRouteState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.executor_token else {
            tracing::warn!("Executor token not configured, refusing executor request");
            return Err(ApiError::ExecutorUnauthorized);
        };
        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match presented {
            Some(token) if token == expected.expose_secret() => Ok(ExecutorAuth),
            _ => Err(ApiError::ExecutorUnauthorized),
        }
    }
}

/// Error body returned by every route.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    ExecutorUnauthorized,
    Lifecycle(LifecycleError),
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        ApiError::Lifecycle(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::Unauthenticated => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": format!("missing {USER_HEADER} header") })),
                )
                    .into_response();
            }
            ApiError::ExecutorUnauthorized => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "missing or invalid executor token" })),
                )
                    .into_response();
            }
            ApiError::Lifecycle(err) => err,
        };

        let status = match &err {
            LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
            LifecycleError::InvalidTransition { .. } | LifecycleError::ExecutionInFlight { .. } => {
                StatusCode::CONFLICT
            }
            LifecycleError::Generation(GenerationError::InvalidConfiguration(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            LifecycleError::Generation(GenerationError::MalformedOutput { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            LifecycleError::Generation(GenerationError::ServiceUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({ "error": err.to_string() });
        if let LifecycleError::Generation(GenerationError::InvalidConfiguration(v)) = &err {
            body["violations"] = serde_json::to_value(&v.violations).unwrap_or_default();
        }
        if status.is_server_error() {
            tracing::error!(error = %err, "Worker request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkerBody {
    name: String,
    description: String,
    #[serde(rename = "type")]
    worker_type: WorkerType,
    #[serde(default)]
    information: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReconfigureBody {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionBody {
    outcome: ExecutionStatus,
    #[serde(default)]
    replied_observed: bool,
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /api/workers
///
/// Generates a configuration from the description and stores a DRAFT worker.
async fn create_worker(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
    Json(body): Json<CreateWorkerBody>,
) -> Result<impl IntoResponse, ApiError> {
    let worker = state
        .manager
        .create(NewWorker {
            user_id,
            name: body.name,
            description: body.description,
            worker_type: body.worker_type,
            information: body.information,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

/// GET /api/workers
async fn list_workers(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.list(&user_id).await?))
}

/// GET /api/workers/{id}
async fn get_worker(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.get(&user_id, id).await?))
}

async fn activate_worker(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.activate(&user_id, id).await?))
}

async fn pause_worker(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.pause(&user_id, id).await?))
}

async fn stop_worker(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.stop(&user_id, id).await?))
}

/// POST /api/workers/{id}/reconfigure
///
/// Body: `{"description": "..."}`; an empty object regenerates from the
/// stored description.
async fn reconfigure_worker(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
    Json(body): Json<ReconfigureBody>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .manager
            .reconfigure(&user_id, id, body.description)
            .await?,
    ))
}

/// POST /api/workers/{id}/executions
///
/// Execution report from the executor acting on the user's behalf.
async fn report_execution(
    State(state): State<WorkerRouteState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
    Json(body): Json<ExecutionBody>,
) -> Result<impl IntoResponse, ApiError> {
    // Ownership check; the report itself is not user-scoped.
    state.manager.get(&user_id, id).await?;
    let report = ExecutionReport {
        worker_id: id,
        outcome: body.outcome,
        replied_observed: body.replied_observed,
    };
    Ok(Json(state.manager.report_execution(&report).await?))
}

/// GET /api/executor/due
///
/// Every user's due workers; only the executor may ask.
async fn due_workers(
    State(state): State<WorkerRouteState>,
    _auth: ExecutorAuth,
) -> Result<impl IntoResponse, ApiError> {
    let now = state.manager.current_time();
    Ok(Json(state.manager.due_workers(now).await?))
}

/// Build the worker REST routes.
pub fn worker_routes(state: WorkerRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/workers", post(create_worker).get(list_workers))
        .route("/api/workers/{id}", get(get_worker))
        .route("/api/workers/{id}/activate", post(activate_worker))
        .route("/api/workers/{id}/pause", post(pause_worker))
        .route("/api/workers/{id}/stop", post(stop_worker))
        .route("/api/workers/{id}/reconfigure", post(reconfigure_worker))
        .route("/api/workers/{id}/executions", post(report_execution))
        .route("/api/executor/due", get(due_workers))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
