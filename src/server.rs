use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::db::{self, Bucket, HistogramKind};
use crate::supervisor::{StartOutcome, StopStatus, Supervisor, LOG_BUFFER_MAX_LINES};

/// Dashboard frontend allowed to call the API from the browser.
const FRONTEND_ORIGIN: &str = "http://localhost:3000";

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub default_db: PathBuf,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct StdoutParams {
    #[serde(default = "default_lines")]
    lines: i64,
}

fn default_lines() -> i64 {
    30
}

#[derive(Debug, Serialize)]
pub struct StdoutResponse {
    stdout: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    intermediate_dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    status: StopStatus,
}

#[derive(Debug, Deserialize)]
pub struct OrganizeRequest {
    input_dir: PathBuf,
    #[serde(default)]
    output_db: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct OrganizeResponse {
    status: &'static str,
    output_db: String,
    reviews: usize,
}

#[derive(Debug, Deserialize)]
pub struct HistogramParams {
    kind: String,
    #[serde(default)]
    db: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct HistogramResponse {
    kind: String,
    buckets: Vec<Bucket>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/stdout", get(stdout))
        .route("/start-scraping", post(start_scraping))
        .route("/stop-scraping", post(stop_scraping))
        .route("/organize", post(organize))
        .route("/charts/histogram", get(histogram))
        .layer(
            CorsLayer::new()
                .allow_origin(HeaderValue::from_static(FRONTEND_ORIGIN))
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Control server listening on http://{}", addr);
    state
        .supervisor
        .logs()
        .push_tagged("server", &format!("listening on http://{}", addr));
    axum::serve(listener, router(state))
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        message: "Scraper server is running",
    })
}

async fn stdout(
    State(state): State<AppState>,
    Query(params): Query<StdoutParams>,
) -> Json<StdoutResponse> {
    let n = params.lines.clamp(0, LOG_BUFFER_MAX_LINES as i64) as usize;
    Json(StdoutResponse {
        stdout: state.supervisor.tail(n),
    })
}

async fn start_scraping(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartOutcome>, ApiError> {
    let dir = resolve_dir(&request.intermediate_dir).map_err(internal_error)?;
    let outcome = state.supervisor.start(&dir).await.map_err(internal_error)?;
    Ok(Json(outcome))
}

async fn stop_scraping(State(state): State<AppState>) -> Json<StopResponse> {
    Json(StopResponse {
        status: state.supervisor.stop().await,
    })
}

async fn organize(
    State(state): State<AppState>,
    Json(request): Json<OrganizeRequest>,
) -> Result<Json<OrganizeResponse>, ApiError> {
    let input_dir = request.input_dir;
    if !input_dir.is_dir() {
        return Err(bad_request(format!(
            "input_dir does not exist or is not a directory: {}",
            input_dir.display()
        )));
    }
    let output_db = request.output_db.unwrap_or(state.default_db.clone());
    if let Some(parent) = output_db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| internal_error(e.into()))?;
    }

    let logs = Arc::clone(state.supervisor.logs());
    logs.push_tagged(
        "server",
        &format!(
            "organizing dataset from {} into {}",
            input_dir.display(),
            output_db.display()
        ),
    );
    let db_path = output_db.clone();
    let result = tokio::task::spawn_blocking(move || db::organize(&input_dir, &db_path))
        .await
        .map_err(|e| internal_error(anyhow::anyhow!("organize task failed: {}", e)))?;

    match result {
        Ok(reviews) => Ok(Json(OrganizeResponse {
            status: "ok",
            output_db: output_db.display().to_string(),
            reviews,
        })),
        Err(e) => {
            logs.push_tagged("server", &format!("organize failed: {:#}", e));
            Err(internal_error(e.context("organize failed")))
        }
    }
}

async fn histogram(
    State(state): State<AppState>,
    Query(params): Query<HistogramParams>,
) -> Result<Json<HistogramResponse>, ApiError> {
    let kind = HistogramKind::parse(&params.kind)
        .ok_or_else(|| bad_request(format!("unknown histogram kind: {}", params.kind)))?;
    let db_path = params.db.unwrap_or(state.default_db.clone());
    if !db_path.is_file() {
        return Err(not_found(format!(
            "database not found: {}",
            db_path.display()
        )));
    }

    let buckets = tokio::task::spawn_blocking(move || {
        let conn = db::connect(&db_path)?;
        db::histogram(&conn, kind)
    })
    .await
    .map_err(|e| internal_error(anyhow::anyhow!("histogram task failed: {}", e)))?
    .map_err(internal_error)?;

    Ok(Json(HistogramResponse {
        kind: params.kind,
        buckets,
    }))
}

/// Create the directory and return its absolute path.
fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    dir.canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: format!("{:#}", err),
        }),
    )
}
