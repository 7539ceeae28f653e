//! API request handlers

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use axum::extract::Multipart;

use super::models::{GifDownloadRequest, ProcessingRequest, ProcessingResponse, UploadResponse};
use super::server::AppState;
use super::ApiError;
use crate::movement::MovementVocabulary;
use crate::processing::Job;
use crate::render::{RenderSettings, TrimOutcome};

/// Handle health check requests
pub async fn health_check() -> Result<Value> {
    Ok(serde_json::json!({
        "status": "healthy",
        "service": "workout-clipper",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Upload ids are generated by us; anything else never names a file.
fn is_valid_video_id(video_id: &str) -> bool {
    uuid::Uuid::parse_str(video_id).is_ok()
}

/// Store the `file` field of a multipart upload as `<uploads>/<uuid>.<ext>`
pub async fn save_upload(state: &AppState, mut multipart: Multipart) -> Result<UploadResponse, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let ext = state
            .video_processor
            .supported_extension(&filename)
            .ok_or_else(|| ApiError::BadRequest("Unsupported file format".to_string()))?;

        let uploads_dir = &state.config.output.uploads_dir;
        tokio::fs::create_dir_all(uploads_dir)
            .await
            .context("cannot create uploads directory")?;

        let video_id = uuid::Uuid::new_v4().to_string();
        let path = uploads_dir.join(format!("{}.{}", video_id, ext));
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("cannot create {}", path.display()))?;

        let mut size = 0usize;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
        {
            size += chunk.len();
            file.write_all(&chunk).await.context("failed to write upload")?;
        }
        file.flush().await.context("failed to write upload")?;

        info!("📥 Stored upload {} as {} ({:.1} MB)", filename, path.display(), size as f64 / 1_000_000.0);
        return Ok(UploadResponse { video_id });
    }

    Err(ApiError::BadRequest("Missing file field".to_string()))
}

/// Path of a stored upload, whatever its extension
pub async fn find_upload(uploads_dir: &Path, video_id: &str) -> Option<PathBuf> {
    if !is_valid_video_id(video_id) {
        return None;
    }

    let mut entries = tokio::fs::read_dir(uploads_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) == Some(video_id) {
            return Some(path);
        }
    }
    None
}

/// Run the pipeline for an uploaded video and attach clip names to the result
pub async fn process_video(state: &AppState, request: ProcessingRequest) -> Result<ProcessingResponse, ApiError> {
    let video_path = find_upload(&state.config.output.uploads_dir, &request.video_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Video not found: {}", request.video_id)))?;

    let requested = MovementVocabulary::from_list(request.movements);
    let vocabulary = if requested.is_empty() {
        state.vocabulary.clone()
    } else {
        requested
    };

    info!(
        "🏋️ Processing video {} for {} movement(s)",
        request.video_id,
        vocabulary.len()
    );

    let job = Job::with_id(request.video_id.clone(), video_path);
    let pipeline = state.pipeline.clone();
    let threshold = state.config.detection.similarity_threshold;
    let settings = RenderSettings::from(&state.config.render);

    // The job runs on its own task so a client that hangs up does not
    // abort it halfway.
    let handle = tokio::spawn(async move {
        pipeline
            .run(&job, vocabulary.movements(), threshold, settings)
            .await
    });
    let outcome = handle.await.context("processing task panicked")?;

    schedule_progress_release(state, &request.video_id);

    let result = outcome?;
    Ok(ProcessingResponse::from_detection(&request.video_id, &result))
}

/// Drop the job's progress log once late subscribers had a chance to read it
fn schedule_progress_release(state: &AppState, video_id: &str) {
    let bus = state.pipeline.bus().clone();
    let video_id = video_id.to_string();
    let retention = Duration::from_secs(state.config.server.progress_retention_secs);
    tokio::spawn(async move {
        tokio::time::sleep(retention).await;
        if bus.release(&video_id) {
            debug!("Progress log for {} expired", video_id);
        }
    });
}

/// Map a requested clip path onto the clips directory. Only plain relative
/// paths to existing files are accepted.
pub fn resolve_clip_path(clips_dir: &Path, requested: &str) -> Option<PathBuf> {
    let requested = Path::new(requested);
    let is_plain = requested.components().count() > 0
        && requested
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !is_plain {
        return None;
    }

    let full_path = clips_dir.join(requested);
    full_path.is_file().then_some(full_path)
}

/// Clip to serve for a download request, trimmed when both bounds are given
pub async fn prepare_download(
    state: &AppState,
    requested: &str,
    bounds: Option<(f64, f64)>,
) -> Result<TrimOutcome, ApiError> {
    let full_path = resolve_clip_path(&state.config.output.clips_dir, requested)
        .ok_or_else(|| ApiError::NotFound("GIF not found".to_string()))?;

    Ok(match bounds {
        Some((start, end)) => state.renderer.trim_clip(&full_path, start, end).await,
        None => TrimOutcome::Original(full_path),
    })
}

/// Bundle the selected clips into a temporary zip file. Missing clips are
/// skipped.
pub async fn build_zip(state: &AppState, gifs: &[GifDownloadRequest]) -> Result<TempPath> {
    let mut entries: Vec<(String, TrimOutcome)> = Vec::with_capacity(gifs.len());
    for gif in gifs {
        let name = gif.clip_path();
        let Some(full_path) = resolve_clip_path(&state.config.output.clips_dir, name) else {
            warn!("⚠️  Skipping missing clip: {}", name);
            continue;
        };

        let outcome = match gif.trim_bounds() {
            Some((start, end)) => state.renderer.trim_clip(&full_path, start, end).await,
            None => TrimOutcome::Original(full_path),
        };
        entries.push((name.to_string(), outcome));
    }

    let zip_path = tempfile::Builder::new()
        .prefix("selected_gifs_")
        .suffix(".zip")
        .tempfile()?
        .into_temp_path();

    let target = zip_path.to_path_buf();
    let count = entries.len();
    tokio::task::spawn_blocking(move || write_zip(&target, &entries))
        .await
        .context("zip task panicked")??;

    info!("📦 Created zip bundle with {} clip(s)", count);
    Ok(zip_path)
}

fn write_zip(target: &Path, entries: &[(String, TrimOutcome)]) -> Result<()> {
    let file = std::fs::File::create(target)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, outcome) in entries {
        let content = std::fs::read(outcome.path())
            .with_context(|| format!("cannot read {}", outcome.path().display()))?;
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&content)?;
    }

    zip.finish()?;
    Ok(())
}

/// Delete a temporary file after `delay`, once it has been streamed out
pub fn schedule_cleanup(path: TempPath, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let path_display = path.display().to_string();
        if let Err(e) = path.close() {
            error!("Failed to cleanup temporary file {}: {}", path_display, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_clip_path_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("01_arm_swings_01.gif"), b"gif").unwrap();

        assert!(resolve_clip_path(dir.path(), "01_arm_swings_01.gif").is_some());
        assert!(resolve_clip_path(dir.path(), "missing.gif").is_none());
        assert!(resolve_clip_path(dir.path(), "../etc/passwd").is_none());
        assert!(resolve_clip_path(dir.path(), "/etc/passwd").is_none());
        assert!(resolve_clip_path(dir.path(), "").is_none());
    }

    #[tokio::test]
    async fn test_find_upload() {
        let dir = TempDir::new().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        std::fs::write(dir.path().join(format!("{}.mov", id)), b"video").unwrap();

        assert_eq!(
            find_upload(dir.path(), &id).await,
            Some(dir.path().join(format!("{}.mov", id)))
        );
        assert!(find_upload(dir.path(), &uuid::Uuid::new_v4().to_string()).await.is_none());
        assert!(find_upload(dir.path(), "../secret").await.is_none());
    }

    #[tokio::test]
    async fn test_health_check() {
        let health = health_check().await.unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["service"], "workout-clipper");
    }
}
