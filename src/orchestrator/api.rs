//! HTTP API for the browser UI.
//!
//! Uploads come in as multipart, runs execute on a blocking worker behind
//! the compute lock, and artifacts are served back through the path guard.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::{Settings, SettingsFile, normalize_output_root, parse_bool};
use crate::desktop::Desktop;
use crate::error::{ConfigError, DesktopError, PathError, RunError};
use crate::orchestrator::runs::{RunOrchestrator, RunRequest, RunResult, UploadPayload};
use crate::safety;

/// Built-in studio page, served at `/` unless a UI folder is configured.
const INDEX_HTML: &str = include_str!("index.html");

/// Shared state for the studio API.
#[derive(Clone)]
pub struct StudioState {
    pub orchestrator: Arc<RunOrchestrator>,
    /// Where a changed output root is persisted.
    pub settings: Arc<SettingsFile>,
    pub desktop: Arc<dyn Desktop>,
    /// Folder holding `index.html` and a `static/` subfolder for a custom UI.
    pub ui_dir: Option<PathBuf>,
}

/// The studio's HTTP server.
pub struct StudioApi;

impl StudioApi {
    /// Build the axum router. `max_upload_bytes` bounds a whole predict request.
    pub fn router(state: StudioState, max_upload_bytes: usize) -> Router {
        let mut router = Router::new()
            .route("/", get(index))
            .route(
                "/api/predict",
                post(predict).layer(DefaultBodyLimit::max(max_upload_bytes)),
            )
            .route("/api/file/{run_id}/{filename}", get(download_file))
            .route("/api/output-root", get(get_output_root).put(put_output_root))
            .route("/api/output-root/select", post(select_output_root))
            .route("/api/output-root/open", post(open_output_root))
            .route("/health", get(health_check));
        if let Some(ui_dir) = &state.ui_dir {
            router = router.nest_service("/static", ServeDir::new(ui_dir.join("static")));
        }
        router.layer(TraceLayer::new_for_http()).with_state(state)
    }

    /// Serve on an already-bound listener until the process exits.
    pub async fn start(
        state: StudioState,
        listener: tokio::net::TcpListener,
        max_upload_bytes: usize,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = Self::router(state, max_upload_bytes);
        tracing::info!("SHARP Studio listening on http://{}", listener.local_addr()?);
        axum::serve(listener, router).await?;
        Ok(())
    }
}

// -- Errors --

/// An error rendered as `{"detail": message}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        if e.is_client_error() {
            tracing::warn!("Run rejected: {}", e);
            Self::BadRequest(e.to_string())
        } else {
            tracing::error!("Run failed: {}", e);
            Self::Internal(e.to_string())
        }
    }
}

impl From<PathError> for ApiError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Escape { .. } => {
                tracing::warn!("Rejected file request: {}", e);
                Self::BadRequest("Invalid path.".to_string())
            }
            PathError::Resolve { .. } => {
                tracing::error!("{}", e);
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<DesktopError> for ApiError {
    fn from(e: DesktopError) -> Self {
        tracing::error!("{}", e);
        match e {
            DesktopError::EnvironmentUnavailable => Self::Internal(e.to_string()),
            DesktopError::OpenFailed { .. } => {
                Self::Internal("Failed to open output folder.".to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::BadRequest(format!("Malformed upload: {}", e.body_text()))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        tracing::error!("Worker task failed: {}", e);
        Self::Internal("Worker task failed.".to_string())
    }
}

// -- Handlers --

async fn health_check() -> &'static str {
    "ok"
}

/// The studio page: `index.html` from the UI folder if it has one, the
/// built-in page otherwise.
async fn index(State(state): State<StudioState>, request: Request) -> Response {
    if let Some(ui_dir) = &state.ui_dir {
        let page = ui_dir.join("index.html");
        if tokio::fs::metadata(&page).await.is_ok_and(|m| m.is_file()) {
            return ServeFile::new(page)
                .oneshot(request)
                .await
                .unwrap_or_else(|never| match never {})
                .into_response();
        }
        tracing::debug!("No index.html in {}, serving the built-in page", ui_dir.display());
    }
    Html(INDEX_HTML).into_response()
}

async fn predict(
    State(state): State<StudioState>,
    multipart: Multipart,
) -> Result<Json<RunResult>, ApiError> {
    let request = read_run_request(multipart).await?;
    tracing::info!(
        images = request.images.len(),
        device = %request.device,
        render = request.render,
        checkpoint = request.checkpoint.is_some(),
        "Received predict request"
    );

    let orchestrator = Arc::clone(&state.orchestrator);
    let result = tokio::task::spawn_blocking(move || orchestrator.execute(request)).await??;

    Ok(Json(with_file_urls(result)))
}

/// Collect multipart parts into a [`RunRequest`].
///
/// Boolean fields accept `true`, `1`, `on`, `yes` in any case.
async fn read_run_request(mut multipart: Multipart) -> Result<RunRequest, ApiError> {
    let mut request = RunRequest {
        images: Vec::new(),
        checkpoint: None,
        device: "default".to_string(),
        render: false,
        allow_unsafe: false,
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "images" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content = field.bytes().await?.to_vec();
                // An empty file input still submits one blank part.
                if filename.is_empty() && content.is_empty() {
                    continue;
                }
                request.images.push(UploadPayload { filename, content });
            }
            "checkpoint" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content = field.bytes().await?.to_vec();
                if !filename.is_empty() {
                    request.checkpoint = Some(UploadPayload { filename, content });
                }
            }
            "device" => {
                let device = field.text().await?;
                if !device.trim().is_empty() {
                    request.device = device.trim().to_string();
                }
            }
            "render" => request.render = form_bool(&name, &field.text().await?)?,
            "unsafe_checkpoint" => request.allow_unsafe = form_bool(&name, &field.text().await?)?,
            other => {
                tracing::debug!("Ignoring unknown form field '{}'", other);
            }
        }
    }

    Ok(request)
}

fn form_bool(field: &str, raw: &str) -> Result<bool, ApiError> {
    parse_bool(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("Field '{}' must be a boolean.", field)))
}

/// Turn run-relative file names into download URLs.
fn with_file_urls(result: RunResult) -> RunResult {
    let run_id = result.run_id.clone();
    let url = |name: &str| format!("/api/file/{}/{}", run_id, name);
    RunResult {
        outputs: result
            .outputs
            .into_iter()
            .map(|entry| entry.map_files(url))
            .collect(),
        bundle: url(&result.bundle),
        ..result
    }
}

async fn download_file(
    State(state): State<StudioState>,
    Path((run_id, filename)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let roots = Arc::clone(state.orchestrator.roots());
    let found = tokio::task::spawn_blocking(move || -> Result<Option<PathBuf>, PathError> {
        let run_root = roots.get_run_root(&run_id);
        let run_dir = safety::resolve(&run_root, &run_root.join(&run_id))?;
        match safety::resolve(&run_dir, &run_dir.join(&filename)) {
            Ok(path) => Ok(path.is_file().then_some(path)),
            // A symlink whose target is gone.
            Err(PathError::Resolve { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    })
    .await??;

    let Some(file_path) = found else {
        return Err(ApiError::NotFound("File not found.".to_string()));
    };

    let response = ServeFile::new(&file_path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    Ok(response.into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutputRootResponse {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct OutputRootUpdate {
    pub path: String,
}

impl OutputRootResponse {
    fn new(path: &std::path::Path, changed: Option<bool>) -> Self {
        Self {
            path: path.display().to_string(),
            changed,
        }
    }
}

async fn get_output_root(State(state): State<StudioState>) -> Json<OutputRootResponse> {
    Json(OutputRootResponse::new(
        &state.orchestrator.roots().get_root(),
        None,
    ))
}

async fn put_output_root(
    State(state): State<StudioState>,
    Json(update): Json<OutputRootUpdate>,
) -> Result<Json<OutputRootResponse>, ApiError> {
    if update.path.trim().is_empty() {
        return Err(ApiError::BadRequest("Output path must not be empty.".to_string()));
    }
    let root = change_output_root(&state, PathBuf::from(update.path)).await?;
    Ok(Json(OutputRootResponse::new(&root, Some(true))))
}

async fn select_output_root(
    State(state): State<StudioState>,
) -> Result<Json<OutputRootResponse>, ApiError> {
    let current = state.orchestrator.roots().get_root();
    let desktop = Arc::clone(&state.desktop);
    let initial = current.clone();
    let selected = tokio::task::spawn_blocking(move || desktop.pick_folder(&initial)).await??;

    match selected {
        Some(path) => {
            let root = change_output_root(&state, path).await?;
            Ok(Json(OutputRootResponse::new(&root, Some(true))))
        }
        None => Ok(Json(OutputRootResponse::new(&current, Some(false)))),
    }
}

async fn open_output_root(
    State(state): State<StudioState>,
) -> Result<Json<OutputRootResponse>, ApiError> {
    let root = state.orchestrator.roots().get_root();
    let desktop = Arc::clone(&state.desktop);
    let target = root.display().to_string();
    tokio::task::spawn_blocking(move || desktop.open(&target)).await??;
    Ok(Json(OutputRootResponse::new(&root, None)))
}

/// Normalize, activate, and persist a new output root.
async fn change_output_root(state: &StudioState, path: PathBuf) -> Result<PathBuf, ApiError> {
    let normalized =
        tokio::task::spawn_blocking(move || normalize_output_root(&path)).await??;

    state.orchestrator.roots().set_root(normalized.clone());
    let settings = Arc::clone(&state.settings);
    let saved = normalized.clone();
    tokio::task::spawn_blocking(move || {
        settings.save(&Settings {
            output_root: Some(saved),
        })
    })
    .await?;
    Ok(normalized)
}
