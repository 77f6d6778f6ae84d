//! HTTP handlers organized by resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use scout_core::ids::WorkspaceId;
use scout_core::workspace::{Domain, Workspace};
use scout_engine::error::EngineError;
use scout_store::StoreError;

use crate::orchestrator::{RunState, StartResult};
use crate::server::AppState;

const DEFAULT_SEARCH_LIMIT: u32 = 10;
const MAX_LIST_LIMIT: u32 = 100;

/// Error body returned by every endpoint: `{code, message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref message) = self {
            tracing::error!(error = %message, "request failed");
        }
        let body = json!({ "code": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::WorkspaceNotFound(_) => Self::NotFound(e.to_string()),
            EngineError::AlreadyRunning(_) => Self::Conflict(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Run a store call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
        .map_err(ApiError::from)
}

// ── Health ──

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Workspaces ──

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub query: String,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

pub async fn create_workspace(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    if let Some(domain) = req.domains.iter().find(|d| d.id.as_str().is_empty()) {
        return Err(ApiError::BadRequest(format!(
            "domain \"{}\" is missing an id",
            domain.name
        )));
    }

    let repo = state.workspaces.clone();
    let workspace = blocking(move || repo.create(&req.query, req.domains)).await?;
    tracing::info!(
        workspace_id = %workspace.id,
        domains = workspace.domains.len(),
        "workspace stored"
    );
    Ok(Json(json!({ "status": "success", "workspace_id": workspace.id })))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workspace>, ApiError> {
    let repo = state.workspaces.clone();
    let id = WorkspaceId::from_raw(id);
    blocking(move || repo.find(&id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Workspace not found".into()))
}

pub async fn list_workspaces(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let repo = state.workspaces.clone();
    let workspaces = blocking(move || repo.list()).await?;
    Ok(Json(json!({ "workspaces": workspaces })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let repo = state.documents.clone();
    let id = WorkspaceId::from_raw(id);
    let limit = params.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let documents = blocking(move || repo.list_for_workspace(&id, limit)).await?;
    Ok(Json(json!({ "count": documents.len(), "documents": documents })))
}

// ── Orchestration ──

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub workspace_id: String,
}

pub async fn start_orchestration(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResult>, ApiError> {
    if req.workspace_id.trim().is_empty() {
        return Err(ApiError::BadRequest("workspace_id must not be empty".into()));
    }
    let workspace_id = WorkspaceId::from_raw(req.workspace_id);
    let result = state.orchestrator.start(&workspace_id).await?;
    Ok(Json(result))
}

pub async fn abort_orchestration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    let aborted = state.orchestrator.abort(&WorkspaceId::from_raw(id));
    Json(json!({ "aborted": aborted }))
}

pub async fn orchestration_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<RunState> {
    Json(state.orchestrator.state(&WorkspaceId::from_raw(id)))
}

// ── Knowledge ──

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
    pub workspace_id: Option<String>,
}

pub async fn search_knowledge(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let repo = state.documents.clone();
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let workspace_id = params.workspace_id.map(WorkspaceId::from_raw);
    let query = params.q.clone();
    let hits = blocking(move || repo.search(&query, workspace_id.as_ref(), limit)).await?;
    Ok(Json(json!({
        "query": params.q,
        "count": hits.len(),
        "results": hits,
    })))
}

// ── Telemetry ──

#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub session_id: Option<String>,
    pub domain_id: Option<String>,
    pub error_kind: Option<String>,
    pub level: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// `GET /api/logs`: persisted warnings, newest first. Scoping to a
/// session adds per-domain retry totals.
pub async fn telemetry_logs(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<Json<Value>, ApiError> {
    let disabled = || json!({ "logs": [], "total_count": 0, "enabled": false });
    let Some(telemetry) = state.telemetry.clone() else {
        return Ok(Json(disabled()));
    };

    let body = tokio::task::spawn_blocking(move || -> Result<Value, ApiError> {
        let Some(sink) = telemetry.logs() else {
            return Ok(disabled());
        };
        let domains = match &params.session_id {
            Some(session_id) => Some(sink.domain_summary(session_id).map_err(log_query_failed)?),
            None => None,
        };
        let logs = sink
            .query(&scout_telemetry::LogQuery {
                session_id: params.session_id,
                domain_id: params.domain_id,
                error_kind: params.error_kind,
                level: params.level,
                since: params.since,
                limit: params.limit,
            })
            .map_err(log_query_failed)?;

        let mut body = json!({
            "total_count": logs.len(),
            "logs": logs,
            "enabled": true,
        });
        if let Some(domains) = domains {
            body["domains"] = json!(domains);
        }
        Ok(body)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("log task failed: {e}")))??;
    Ok(Json(body))
}

fn log_query_failed(e: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(format!("log query failed: {e}"))
}
