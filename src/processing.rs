use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::audio::FfmpegAudioExtractor;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::movement::{DetectionResult, MovementDetector, MovementVocabulary};
use crate::progress::{Message, ProgressBus, ProgressEvent, Stage};
use crate::render::{plan_clips, ClipWindow, FfmpegClipRenderer, RenderSettings, RenderedClip};
use crate::transcription::{TranscriptSegment, WhisperTranscriber};

/// Produces an audio track from a video
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Write the audio into `work_dir` and return its path
    async fn extract(&self, video_path: &Path, work_dir: &Path) -> anyhow::Result<PathBuf>;
}

/// Turns an audio track into timed text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Segments in chronological order. A transcript already cached in
    /// `cache_dir` is returned as-is.
    async fn transcribe(&self, audio_path: &Path, cache_dir: &Path) -> anyhow::Result<Vec<TranscriptSegment>>;
}

/// Writes one clip per window
#[async_trait]
pub trait ClipRenderer: Send + Sync {
    /// Clips of one job are kept apart from every other job's, under a
    /// directory named after `job_id`.
    async fn render(
        &self,
        job_id: &str,
        video_path: &Path,
        clips: &[ClipWindow],
        settings: &RenderSettings,
    ) -> anyhow::Result<Vec<RenderedClip>>;
}

/// One video to process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub video_path: PathBuf,
}

impl Job {
    /// Job with a fresh random id
    pub fn new(video_path: impl Into<PathBuf>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), video_path)
    }

    pub fn with_id(id: impl Into<String>, video_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            video_path: video_path.into(),
        }
    }
}

/// Caller-side request to stop a job. Honoured between stages only; a
/// running collaborator call is waited out.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Publishes the terminator when a run ends, however it ends.
struct TerminatorGuard<'a> {
    bus: &'a ProgressBus,
    job_id: &'a str,
}

impl Drop for TerminatorGuard<'_> {
    fn drop(&mut self) {
        self.bus.publish(self.job_id, Message::Terminator);
    }
}

/// Runs audio extraction, transcription, detection and rendering for a job,
/// reporting each stage to the progress bus.
#[derive(Clone)]
pub struct Pipeline {
    audio: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn Transcriber>,
    renderer: Arc<dyn ClipRenderer>,
    bus: ProgressBus,
    work_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        audio: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn Transcriber>,
        renderer: Arc<dyn ClipRenderer>,
        bus: ProgressBus,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            audio,
            transcriber,
            renderer,
            bus,
            work_dir: work_dir.into(),
        }
    }

    /// Pipeline backed by ffmpeg and Whisper
    pub fn from_config(config: &Config, vocabulary: &MovementVocabulary, bus: ProgressBus) -> Self {
        let prompt = config
            .transcription
            .use_movement_prompt
            .then(|| vocabulary.generate_prompt());

        Self::new(
            Arc::new(FfmpegAudioExtractor::new(&config.audio)),
            Arc::new(WhisperTranscriber::new(config.transcription.clone()).with_prompt(prompt)),
            Arc::new(FfmpegClipRenderer::new(&config.output.clips_dir)),
            bus,
            &config.output.work_dir,
        )
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    /// Scratch directory for one job's audio and transcript
    pub fn job_dir(&self, job: &Job) -> PathBuf {
        self.work_dir.join(&job.id)
    }

    pub async fn run(
        &self,
        job: &Job,
        vocabulary: &[String],
        threshold: u8,
        settings: RenderSettings,
    ) -> Result<DetectionResult> {
        self.run_with_cancel(job, vocabulary, threshold, settings, &CancellationToken::new())
            .await
    }

    /// Process one job. The job's mailbox is opened on entry and always
    /// receives the terminator before this returns or is dropped.
    ///
    /// A closed mailbox left by an earlier run with the same id is replaced.
    /// The mailbox outlives the run so late subscribers can replay it; it is
    /// removed when a subscriber finishes with it, or by
    /// [`ProgressBus::release`] for jobs nobody subscribed to.
    pub async fn run_with_cancel(
        &self,
        job: &Job,
        vocabulary: &[String],
        threshold: u8,
        settings: RenderSettings,
        cancel: &CancellationToken,
    ) -> Result<DetectionResult> {
        self.bus.open_run(&job.id);
        let _terminator = TerminatorGuard {
            bus: &self.bus,
            job_id: &job.id,
        };

        let start_time = Instant::now();
        info!("🚀 Starting workout video processing: {} (job {})", job.video_path.display(), job.id);

        let result = self.run_stages(job, vocabulary, threshold, &settings, cancel).await;
        match &result {
            Ok(detection) => info!(
                "🎉 Job {} completed in {:.1}s: {} window(s) across {} movement(s)",
                job.id,
                start_time.elapsed().as_secs_f64(),
                detection.total_windows(),
                detection.len()
            ),
            Err(e) => error!("❌ Job {} failed: {}", job.id, e),
        }
        result
    }

    async fn run_stages(
        &self,
        job: &Job,
        vocabulary: &[String],
        threshold: u8,
        settings: &RenderSettings,
        cancel: &CancellationToken,
    ) -> Result<DetectionResult> {
        let job_dir = self.job_dir(job);

        let audio_path = self
            .stage(job, Stage::Audio, cancel, async {
                self.audio
                    .extract(&job.video_path, &job_dir)
                    .await
                    .map_err(PipelineError::audio)
            })
            .await?;

        let segments = self
            .stage(job, Stage::Transcribe, cancel, async {
                self.transcriber
                    .transcribe(&audio_path, &job_dir)
                    .await
                    .map_err(PipelineError::transcription)
            })
            .await?;

        let detection = self
            .stage(job, Stage::Detect, cancel, async {
                MovementDetector::new(threshold)
                    .detect(&segments, vocabulary)
                    .map_err(PipelineError::from)
            })
            .await?;

        let clips = plan_clips(&detection);
        self.stage(job, Stage::Render, cancel, async {
            self.renderer
                .render(&job.id, &job.video_path, &clips, settings)
                .await
                .map_err(PipelineError::render)
        })
        .await?;

        Ok(detection)
    }

    /// Bracket one stage with its 0% and 100% events. A failed stage gets
    /// no 100% event.
    async fn stage<T, F>(&self, job: &Job, stage: Stage, cancel: &CancellationToken, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            warn!("🛑 Job {} cancelled before the {} stage", job.id, stage);
            return Err(PipelineError::Cancelled { stage });
        }

        self.bus.publish(&job.id, ProgressEvent::started(stage));
        let value = work.await?;
        self.bus.publish(&job.id, ProgressEvent::finished(stage));
        info!("✅ Job {}: {} stage done", job.id, stage);
        Ok(value)
    }
}
