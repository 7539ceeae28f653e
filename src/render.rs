use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tempfile::TempPath;
use tracing::{info, warn};

use crate::audio::last_line;
use crate::config::RenderConfig;
use crate::movement::DetectionResult;
use crate::processing::ClipRenderer;
use crate::video::VideoProcessor;

/// Output frame rate and playback speed for rendered clips
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub fps: u32,
    pub speed_multiplier: f64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for RenderSettings {
    fn from(config: &RenderConfig) -> Self {
        Self {
            fps: config.fps,
            speed_multiplier: config.speed_multiplier,
        }
    }
}

/// One clip to cut. Indices are 1-based; `movement_index` is the
/// movement's position in the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipWindow {
    pub movement_index: usize,
    pub movement: String,
    pub window_index: usize,
    pub start: f64,
    pub end: f64,
}

impl ClipWindow {
    pub fn file_name(&self) -> String {
        clip_file_name(self.movement_index, &self.movement, self.window_index)
    }
}

/// A clip written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedClip {
    pub movement: String,
    pub window_index: usize,
    pub path: PathBuf,
}

/// `01_chair_squats_02.gif`
pub fn clip_file_name(movement_index: usize, movement: &str, window_index: usize) -> String {
    format!("{:02}_{}_{:02}.gif", movement_index, movement.replace(' ', "_"), window_index)
}

/// Clip path relative to the clips directory: `<job_id>/<file_name>`
pub fn job_clip_path(job_id: &str, file_name: &str) -> String {
    format!("{}/{}", job_id, file_name)
}

/// Every window of a detection result, numbered the way clips are named
pub fn plan_clips(result: &DetectionResult) -> Vec<ClipWindow> {
    result
        .iter()
        .enumerate()
        .flat_map(|(i, (movement, windows))| {
            windows.iter().enumerate().map(move |(j, window)| ClipWindow {
                movement_index: i + 1,
                movement: movement.to_string(),
                window_index: j + 1,
                start: window.start_time,
                end: window.end_time,
            })
        })
        .collect()
}

/// Restrict a window to `[0, duration]`. `None` when nothing is left.
pub fn clamp_window(start: f64, end: f64, duration: f64) -> Option<(f64, f64)> {
    let start = start.max(0.0);
    let end = end.min(duration);
    (end > start).then_some((start, end))
}

/// Map requested trim bounds into a clip of `duration` seconds.
///
/// Bounds wrap around the clip length; when the wrapped start is not before
/// the wrapped end, the trim runs to the end of the clip.
pub fn relative_trim_bounds(start: f64, end: f64, duration: f64) -> Option<(f64, f64)> {
    if !(duration.is_finite() && duration > 0.0 && start.is_finite() && end.is_finite()) {
        return None;
    }

    let relative_start = start.rem_euclid(duration);
    let mut relative_end = end.rem_euclid(duration).min(duration);
    if relative_start >= relative_end {
        relative_end = duration;
    }
    Some((relative_start, relative_end))
}

/// Result of a trim request. Trimming never fails outright: any problem
/// yields the untouched original.
#[derive(Debug)]
pub enum TrimOutcome {
    /// Freshly cut clip; the file is deleted when the path is dropped
    Trimmed(TempPath),
    Original(PathBuf),
}

impl TrimOutcome {
    pub fn path(&self) -> &Path {
        match self {
            TrimOutcome::Trimmed(path) => path,
            TrimOutcome::Original(path) => path,
        }
    }

    pub fn is_trimmed(&self) -> bool {
        matches!(self, TrimOutcome::Trimmed(_))
    }
}

/// Cuts GIF clips out of a video with ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegClipRenderer {
    output_dir: PathBuf,
    video_processor: VideoProcessor,
}

impl FfmpegClipRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            video_processor: VideoProcessor::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory holding one job's clips. The id must be a single plain
    /// path component.
    pub fn job_dir(&self, job_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(job_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.output_dir.join(job_id)),
            _ => Err(anyhow!("job id {:?} cannot name a clip directory", job_id)),
        }
    }

    async fn render_gif(
        &self,
        input: &Path,
        start: f64,
        end: f64,
        output: &Path,
        settings: Option<&RenderSettings>,
    ) -> Result<()> {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        cmd.args(["-v", "error", "-ss", &format!("{:.3}", start), "-t", &format!("{:.3}", end - start)])
            .arg("-i")
            .arg(input);

        if let Some(settings) = settings {
            let filter = format!("setpts=PTS/{},fps={}", settings.speed_multiplier, settings.fps);
            cmd.args(["-vf", &filter]);
        }

        let result = cmd
            .args(["-loop", "0", "-y"])
            .arg(output)
            .output()
            .await
            .context("failed to run ffmpeg")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(anyhow!(
                "ffmpeg failed for {}: {}",
                output.display(),
                last_line(&stderr)
            ));
        }
        Ok(())
    }

    /// Re-cut an existing clip between `start` and `end` seconds
    pub async fn trim_clip(&self, clip_path: &Path, start: f64, end: f64) -> TrimOutcome {
        match self.try_trim(clip_path, start, end).await {
            Ok(trimmed) => TrimOutcome::Trimmed(trimmed),
            Err(e) => {
                warn!("⚠️  Failed to trim {}: {:#}, serving original", clip_path.display(), e);
                TrimOutcome::Original(clip_path.to_path_buf())
            }
        }
    }

    async fn try_trim(&self, clip_path: &Path, start: f64, end: f64) -> Result<TempPath> {
        let duration = self.video_processor.duration_secs(clip_path).await?;
        let (relative_start, relative_end) = relative_trim_bounds(start, end, duration)
            .ok_or_else(|| anyhow!("clip has no usable duration"))?;

        let temp_path = tempfile::Builder::new()
            .prefix("trimmed_")
            .suffix(".gif")
            .tempfile()?
            .into_temp_path();

        self.render_gif(clip_path, relative_start, relative_end, &temp_path, None)
            .await?;
        info!(
            "✂️  Trimmed {} to {:.2}s..{:.2}s",
            clip_path.display(),
            relative_start,
            relative_end
        );
        Ok(temp_path)
    }
}

#[async_trait]
impl ClipRenderer for FfmpegClipRenderer {
    async fn render(
        &self,
        job_id: &str,
        video_path: &Path,
        clips: &[ClipWindow],
        settings: &RenderSettings,
    ) -> Result<Vec<RenderedClip>> {
        info!("🎞️  Generating {} GIF(s) from {}", clips.len(), video_path.display());
        let job_dir = self.job_dir(job_id)?;
        tokio::fs::create_dir_all(&job_dir).await?;

        let duration = if clips.is_empty() {
            0.0
        } else {
            self.video_processor.duration_secs(video_path).await?
        };

        let mut rendered = Vec::with_capacity(clips.len());
        for clip in clips {
            let Some((start, end)) = clamp_window(clip.start, clip.end, duration) else {
                warn!(
                    "⚠️  Skipping {}: window {:.1}s..{:.1}s is outside the video",
                    clip.file_name(),
                    clip.start,
                    clip.end
                );
                continue;
            };

            let path = job_dir.join(clip.file_name());
            info!("🖼️  Creating GIF: {}", clip.file_name());
            self.render_gif(video_path, start, end, &path, Some(settings))
                .await
                .with_context(|| format!("rendering {}", clip.file_name()))?;

            rendered.push(RenderedClip {
                movement: clip.movement.clone(),
                window_index: clip.window_index,
                path,
            });
        }

        info!("✅ GIF generation completed: {} clip(s)", rendered.len());
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::detect;
    use crate::transcription::TranscriptSegment;

    #[test]
    fn test_clip_file_name() {
        assert_eq!(clip_file_name(2, "chair squats", 1), "02_chair_squats_01.gif");
        assert_eq!(clip_file_name(7, "farmer's carry", 12), "07_farmer's_carry_12.gif");
    }

    #[test]
    fn test_plan_uses_vocabulary_position() {
        let segments = vec![
            TranscriptSegment::new(10.0, 12.0, "now do chair squats"),
            TranscriptSegment::new(40.0, 42.0, "chair squats once more"),
        ];
        let result = detect(&segments, &["arm swings", "chair squats"], 80).unwrap();

        let clips = plan_clips(&result);
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].file_name(), "02_chair_squats_01.gif");
        assert_eq!(clips[1].file_name(), "02_chair_squats_02.gif");
        assert_eq!((clips[0].start, clips[0].end), (8.0, 20.0));
    }

    #[test]
    fn test_clamp_window() {
        assert_eq!(clamp_window(-1.5, 9.0, 60.0), Some((0.0, 9.0)));
        assert_eq!(clamp_window(55.0, 70.0, 60.0), Some((55.0, 60.0)));
        assert_eq!(clamp_window(65.0, 70.0, 60.0), None);
        assert_eq!(clamp_window(-10.0, -2.0, 60.0), None);
    }

    #[test]
    fn test_relative_trim_bounds() {
        assert_eq!(relative_trim_bounds(1.0, 3.0, 5.0), Some((1.0, 3.0)));
        // wraps past the end of the clip
        assert_eq!(relative_trim_bounds(6.0, 8.0, 5.0), Some((1.0, 3.0)));
        // start after end runs to the end
        assert_eq!(relative_trim_bounds(4.0, 2.0, 5.0), Some((4.0, 5.0)));
        assert_eq!(relative_trim_bounds(0.0, 5.0, 5.0), Some((0.0, 5.0)));
        assert_eq!(relative_trim_bounds(1.0, 2.0, 0.0), None);
        assert_eq!(relative_trim_bounds(f64::NAN, 2.0, 5.0), None);
    }

    #[tokio::test]
    async fn test_trim_falls_back_to_original() {
        let dir = tempfile::TempDir::new().unwrap();
        let clip = dir.path().join("01_arm_swings_01.gif");
        tokio::fs::write(&clip, b"not a gif").await.unwrap();

        let renderer = FfmpegClipRenderer::new(dir.path());
        let outcome = renderer.trim_clip(&clip, 1.0, 2.0).await;
        assert!(!outcome.is_trimmed());
        assert_eq!(outcome.path(), clip.as_path());
    }

    #[tokio::test]
    async fn test_render_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = FfmpegClipRenderer::new(dir.path().join("gifs"));
        let rendered = renderer
            .render("job-1", Path::new("unused.mp4"), &[], &RenderSettings::default())
            .await
            .unwrap();
        assert!(rendered.is_empty());
        assert!(renderer.output_dir().join("job-1").is_dir());
    }

    #[test]
    fn test_each_job_gets_its_own_clip_dir() {
        let renderer = FfmpegClipRenderer::new("gifs");
        let a = renderer.job_dir("job-a").unwrap();
        let b = renderer.job_dir("job-b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, PathBuf::from("gifs").join("job-a"));
        assert_eq!(job_clip_path("job-a", "01_plank_01.gif"), "job-a/01_plank_01.gif");
    }

    #[tokio::test]
    async fn test_job_id_cannot_escape_the_clips_dir() {
        let renderer = FfmpegClipRenderer::new("gifs");
        for job_id in ["", "..", "../other", "a/b", "/abs"] {
            assert!(renderer.job_dir(job_id).is_err(), "{:?}", job_id);
        }
        assert!(renderer
            .render("..", Path::new("unused.mp4"), &[], &RenderSettings::default())
            .await
            .is_err());
    }
}
