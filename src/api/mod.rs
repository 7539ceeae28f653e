//! HTTP surface for the workout clipper
//!
//! Upload a video, process it with a movement list, follow progress over
//! SSE and download the resulting GIFs.

use anyhow::Result;
use axum::http::StatusCode;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::PipelineError;

pub mod handlers;
pub mod models;
pub mod server;

pub use server::{router, AppState};

/// Failure of an API request, mapped onto an HTTP status
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Processing(#[from] PipelineError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API server for the web UI
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the API server in the background
    pub fn start_background(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.start().await })
    }

    /// Serve until the listener fails
    pub async fn start(self) -> Result<()> {
        let addr = format!("{}:{}", self.state.config.server.host, self.state.config.server.port);
        info!("🚀 Starting API server on {}", addr);
        server::start_http_server(self.state, &addr).await
    }
}
