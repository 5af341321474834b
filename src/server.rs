//! HTTP API over the scan orchestrator.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/assets?kind=&name=` | Stage the raw request body as an asset |
//! | `GET`    | `/assets` | List staged assets |
//! | `DELETE` | `/assets/{id}` | Clear a staged asset |
//! | `POST`   | `/assets/{id}/scan` | Start a scan |
//! | `GET`    | `/jobs` | List jobs, most recent first |
//! | `GET`    | `/jobs/{id}` | Job record |
//! | `POST`   | `/jobs/{id}/cancel` | Cancel a running job |
//! | `DELETE` | `/jobs/{id}` | Clear a finished job and its matches |
//! | `GET`    | `/alerts?severity=&kind=&state=` | Filtered alert listing |
//! | `GET`    | `/alerts/summary` | Counts by severity and state |
//! | `POST`   | `/alerts/{id}/acknowledge` | Body `{"as": "actioned"}` or `{"as": "dismissed"}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "asset ... already has scan ... in progress" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `validation` | 400 (413 when the file is too large) |
//! | `not_found` | 404 |
//! | `conflict`, `asset_busy`, `invalid_transition` | 409 |
//! | `fingerprint_error`, `search_error` | 502 |
//! | `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! on another port can call the API.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use content_shield_core::error::{ShieldError, ValidationError};
use content_shield_core::job::{JobStatus, ScanJob};
use content_shield_core::models::{
    Acknowledgement, AlertFilter, AlertSummary, AlertView, AssetId, JobId, MatchId, MediaAsset,
    MediaKind,
};

use crate::config::Config;
use crate::ingest::Upload;
use crate::orchestrator::Orchestrator;

/// Headroom above the largest media limit for the request body.
const BODY_LIMIT_SLACK: u64 = 64 * 1024;

#[derive(Clone)]
struct AppState {
    orchestrator: Orchestrator,
}

/// Build the API router for an orchestrator.
///
/// The request body limit is the largest accepted media size plus a small
/// allowance; the ingestor still enforces the per-kind limit.
pub fn router(orchestrator: Orchestrator) -> Router {
    let body_limit = orchestrator
        .ingestor()
        .limits()
        .largest()
        .saturating_add(BODY_LIMIT_SLACK);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/assets", post(handle_stage).get(handle_list_assets))
        .route("/assets/{id}", delete(handle_clear_asset))
        .route("/assets/{id}/scan", post(handle_start_scan))
        .route("/jobs", get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_get_job).delete(handle_clear_job))
        .route("/jobs/{id}/cancel", post(handle_cancel))
        .route("/alerts", get(handle_list_alerts))
        .route("/alerts/summary", get(handle_summary))
        .route("/alerts/{id}/acknowledge", post(handle_acknowledge))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Start the HTTP server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?.build();
    let app = router(orchestrator);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        provider = %config.collaborators.provider,
        "content shield API listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<ShieldError> for AppError {
    fn from(err: ShieldError) -> Self {
        let status = match &err {
            ShieldError::Validation(ValidationError::TooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ShieldError::Validation(_) => StatusCode::BAD_REQUEST,
            ShieldError::NotFound(_) => StatusCode::NOT_FOUND,
            ShieldError::Conflict(_)
            | ShieldError::AssetBusy(_)
            | ShieldError::Transition(_) => StatusCode::CONFLICT,
            ShieldError::Fingerprint(_) | ShieldError::Search(_) => StatusCode::BAD_GATEWAY,
            ShieldError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| bad_request(format!("invalid {} id: {}", what, raw)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Assets ============

#[derive(Deserialize)]
struct StageQuery {
    kind: MediaKind,
    name: String,
}

/// `POST /assets?kind=image&name=Sunset.jpg` with the file as the raw body.
/// The `Content-Type` header is validated against the kind's accepted types.
async fn handle_stage(
    State(state): State<AppState>,
    query: Result<Query<StageQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<MediaAsset>), AppError> {
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;
    let body = body.map_err(|e| AppError {
        status: e.status(),
        code: "bad_request".to_string(),
        message: e.body_text(),
    })?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let asset = state.orchestrator.stage(Upload {
        name: query.name,
        kind: query.kind,
        content_type,
        bytes: body.to_vec(),
    })?;
    Ok((StatusCode::CREATED, Json(asset)))
}

#[derive(Serialize)]
struct AssetListResponse {
    assets: Vec<MediaAsset>,
}

async fn handle_list_assets(
    State(state): State<AppState>,
) -> Result<Json<AssetListResponse>, AppError> {
    let assets = state.orchestrator.ingestor().list()?;
    Ok(Json(AssetListResponse { assets }))
}

async fn handle_clear_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MediaAsset>, AppError> {
    let id: AssetId = parse_id(&id, "asset")?;
    Ok(Json(state.orchestrator.clear_asset(id).await?))
}

async fn handle_start_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobStatus>), AppError> {
    let id: AssetId = parse_id(&id, "asset")?;
    let status = state.orchestrator.start_scan(id).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

// ============ Jobs ============

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<ScanJob>,
}

async fn handle_list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.orchestrator.jobs().await,
    })
}

async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScanJob>, AppError> {
    let id: JobId = parse_id(&id, "job")?;
    Ok(Json(state.orchestrator.job(id).await?))
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, AppError> {
    let id: JobId = parse_id(&id, "job")?;
    Ok(Json(state.orchestrator.cancel(id).await?))
}

#[derive(Serialize)]
struct ClearJobResponse {
    job_id: JobId,
    matches_removed: usize,
}

async fn handle_clear_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClearJobResponse>, AppError> {
    let job_id: JobId = parse_id(&id, "job")?;
    let matches_removed = state.orchestrator.clear_job(job_id).await?;
    Ok(Json(ClearJobResponse {
        job_id,
        matches_removed,
    }))
}

// ============ Alerts ============

#[derive(Serialize)]
struct AlertListResponse {
    alerts: Vec<AlertView>,
}

async fn handle_list_alerts(
    State(state): State<AppState>,
    filter: Result<Query<AlertFilter>, QueryRejection>,
) -> Result<Json<AlertListResponse>, AppError> {
    let Query(filter) = filter.map_err(|e| bad_request(e.body_text()))?;
    let alerts = state.orchestrator.registry().list_alerts(&filter).await?;
    Ok(Json(AlertListResponse { alerts }))
}

async fn handle_summary(State(state): State<AppState>) -> Result<Json<AlertSummary>, AppError> {
    Ok(Json(state.orchestrator.registry().summary().await?))
}

#[derive(Deserialize)]
struct AcknowledgeRequest {
    #[serde(rename = "as")]
    ack: Acknowledgement,
}

async fn handle_acknowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> Result<Json<AlertView>, AppError> {
    let match_id: MatchId = parse_id(&id, "alert")?;
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let view = state
        .orchestrator
        .registry()
        .acknowledge(match_id, body.ack)
        .await?;
    Ok(Json(view))
}
