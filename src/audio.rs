use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::config::AudioConfig;
use crate::processing::AudioExtractor;
use crate::video::VideoProcessor;

/// Properties of an extracted audio track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInfo {
    pub path: PathBuf,
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u32,
    pub file_size: u64,
}

/// Pulls the audio track out of a video with ffmpeg, as 16-bit mono WAV.
#[derive(Debug, Clone)]
pub struct FfmpegAudioExtractor {
    /// Whisper works best at 16 kHz
    pub target_sample_rate: u32,
    /// Output file name inside the work directory
    pub file_name: String,
    video_processor: VideoProcessor,
}

impl FfmpegAudioExtractor {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            target_sample_rate: config.target_sample_rate,
            file_name: config.file_name.clone(),
            video_processor: VideoProcessor::new(),
        }
    }

    /// Extract audio with optimal settings for transcription
    pub async fn extract_for_transcription(&self, video_path: &Path, output_dir: &Path) -> Result<AudioInfo> {
        info!("🎵 Extracting audio from {}", video_path.display());

        let video_info = self.video_processor.get_video_info(video_path).await?;
        if !video_info.has_audio() {
            return Err(anyhow!("no audio track found in video"));
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let audio_path = output_dir.join(&self.file_name);

        let output = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(video_path)
            .args([
                "-vn", // No video stream
                "-acodec", "pcm_s16le", // 16-bit PCM
                "-ar", &self.target_sample_rate.to_string(),
                "-ac", "1", // Mono
                "-f", "wav",
                "-y",
            ])
            .arg(&audio_path)
            .output()
            .await
            .context("failed to run ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "ffmpeg could not extract audio from {}: {}",
                video_path.display(),
                last_line(&stderr)
            ));
        }

        let file_size = tokio::fs::metadata(&audio_path).await?.len();
        let audio_info = AudioInfo {
            path: audio_path,
            duration: video_info.duration,
            sample_rate: self.target_sample_rate,
            channels: 1,
            file_size,
        };

        info!(
            "✅ Audio saved to {} ({:.1}s, {}Hz, {:.1} MB)",
            audio_info.path.display(),
            audio_info.duration.as_secs_f64(),
            audio_info.sample_rate,
            audio_info.file_size as f64 / 1_000_000.0
        );

        Ok(audio_info)
    }
}

impl Default for FfmpegAudioExtractor {
    fn default() -> Self {
        Self::new(&AudioConfig::default())
    }
}

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    async fn extract(&self, video_path: &Path, work_dir: &Path) -> Result<PathBuf> {
        Ok(self.extract_for_transcription(video_path, work_dir).await?.path)
    }
}

/// Last non-empty line of tool output, which is where ffmpeg puts the error
pub(crate) fn last_line(output: &str) -> &str {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
}
