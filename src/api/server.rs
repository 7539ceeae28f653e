//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{error, info};

use super::models::{DownloadQuery, GifDownloadRequest, ProcessingRequest};
use super::{handlers, ApiError};
use crate::config::Config;
use crate::movement::MovementVocabulary;
use crate::processing::Pipeline;
use crate::progress::ProgressBus;
use crate::render::{FfmpegClipRenderer, TrimOutcome};
use crate::video::VideoProcessor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Pipeline,
    /// Used when a request names no movements
    pub vocabulary: MovementVocabulary,
    /// Trims clips on download
    pub renderer: FfmpegClipRenderer,
    pub video_processor: VideoProcessor,
}

impl AppState {
    pub fn new(config: Config, pipeline: Pipeline, vocabulary: MovementVocabulary) -> Self {
        let renderer = FfmpegClipRenderer::new(&config.output.clips_dir);
        Self {
            config: Arc::new(config),
            pipeline,
            vocabulary,
            renderer,
            video_processor: VideoProcessor::new(),
        }
    }

    /// State backed by ffmpeg and Whisper
    pub async fn from_config(config: Config) -> Result<Self> {
        let vocabulary = config.vocabulary().await?;
        let pipeline = Pipeline::from_config(&config, &vocabulary, ProgressBus::new());
        Ok(Self::new(config, pipeline, vocabulary))
    }

    fn temp_file_ttl(&self) -> Duration {
        Duration::from_secs(self.config.server.temp_file_ttl_secs)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({ "error": self.to_string() });
        if let ApiError::Processing(e) = &self {
            body["stage"] = serde_json::json!(e.stage().as_str());
        }
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(body)).into_response()
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let upload_limit = usize::try_from(state.config.server.max_upload_mb.saturating_mul(1024 * 1024))
        .unwrap_or(usize::MAX);
    let enable_cors = state.config.server.enable_cors;

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/process", post(process_handler))
        .route("/api/progress/:video_id", get(progress_handler))
        .route("/api/download/*path", get(download_handler))
        .route("/api/download-selected", post(download_selected_handler))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(&static_dir))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

/// Configure and start the HTTP server
pub async fn start_http_server(state: AppState, addr: &str) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 API server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    match handlers::health_check().await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => ApiError::Internal(e).into_response(),
    }
}

/// Upload handler
async fn upload_handler(State(state): State<AppState>, multipart: Multipart) -> impl IntoResponse {
    match handlers::save_upload(&state, multipart).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Process video handler
async fn process_handler(
    State(state): State<AppState>,
    Json(request): Json<ProcessingRequest>,
) -> impl IntoResponse {
    match handlers::process_video(&state, request).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Progress stream handler (server-sent events)
async fn progress_handler(
    State(state): State<AppState>,
    axum::extract::Path(video_id): axum::extract::Path<String>,
) -> Response {
    let bus = state.pipeline.bus();
    if !bus.contains(&video_id)
        && handlers::find_upload(&state.config.output.uploads_dir, &video_id)
            .await
            .is_none()
    {
        return ApiError::NotFound(format!("Video not found: {}", video_id)).into_response();
    }

    let events = bus.consume(&video_id).into_stream().map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(
            Event::default()
                .event("message")
                .retry(Duration::from_millis(1000))
                .data(data),
        )
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

/// Single clip download, optionally trimmed
async fn download_handler(
    State(state): State<AppState>,
    axum::extract::Path(path): axum::extract::Path<String>,
    Query(query): Query<DownloadQuery>,
    request: Request,
) -> Response {
    let outcome = match handlers::prepare_download(&state, &path, query.start.zip(query.end)).await {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    let file_name = Path::new(&path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "clip.gif".to_string());
    let response = serve_file(outcome.path(), request, &file_name).await;

    if let TrimOutcome::Trimmed(temp_path) = outcome {
        handlers::schedule_cleanup(temp_path, state.temp_file_ttl());
    }
    response
}

/// Zip bundle of selected clips
async fn download_selected_handler(
    State(state): State<AppState>,
    Json(gifs): Json<Vec<GifDownloadRequest>>,
) -> Response {
    let zip_path = match handlers::build_zip(&state, &gifs).await {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to create zip file: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to create zip file"})),
            )
                .into_response();
        }
    };

    let response = serve_file(&zip_path, Request::new(Body::empty()), "selected_gifs.zip").await;
    handlers::schedule_cleanup(zip_path, state.temp_file_ttl());
    response
}

/// Stream a file back as an attachment
async fn serve_file(path: &Path, request: Request, file_name: &str) -> Response {
    let response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let mut response = response.map(Body::new);
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
