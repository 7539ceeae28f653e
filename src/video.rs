use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Upload formats accepted by the service
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["mov", "mp4", "avi"];

/// Video information extracted from file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub filename: String,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: String,
    pub audio_streams: Vec<AudioStreamInfo>,
}

impl VideoInfo {
    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u32,
}

/// ffprobe wrapper for source videos and rendered clips
#[derive(Debug, Clone)]
pub struct VideoProcessor {
    supported_extensions: Vec<String>,
}

impl VideoProcessor {
    pub fn new() -> Self {
        Self {
            supported_extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Lower-cased extension of `filename` when it is an accepted upload format
    pub fn supported_extension(&self, filename: &str) -> Option<String> {
        let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
        self.supported_extensions.contains(&ext).then_some(ext)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| self.supported_extension(name))
            .is_some()
    }

    /// Probe a media file with ffprobe
    pub async fn get_video_info(&self, video_path: &Path) -> Result<VideoInfo> {
        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video_path)
            .output()
            .await
            .context("failed to run ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe failed for {}", video_path.display()));
        }

        let json_str = String::from_utf8(output.stdout)?;
        let video_info = parse_probe_output(video_path, &json_str)?;

        info!(
            "📹 Analyzed video: {} ({}x{}, {:.1}fps, {:.1}s, {} audio stream(s))",
            video_info.filename,
            video_info.width,
            video_info.height,
            video_info.fps,
            video_info.duration_secs(),
            video_info.audio_streams.len()
        );

        Ok(video_info)
    }

    /// Duration in seconds, as reported by the container
    pub async fn duration_secs(&self, path: &Path) -> Result<f64> {
        Ok(self.get_video_info(path).await?.duration_secs())
    }
}

impl Default for VideoProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a [`VideoInfo`] from `ffprobe -print_format json` output.
pub fn parse_probe_output(path: &Path, json_str: &str) -> Result<VideoInfo> {
    let ffprobe_data: serde_json::Value =
        serde_json::from_str(json_str).context("ffprobe returned invalid JSON")?;

    let format = &ffprobe_data["format"];
    let streams = ffprobe_data["streams"]
        .as_array()
        .ok_or_else(|| anyhow!("ffprobe output has no stream list"))?;

    let video_stream = streams.iter().find(|s| s["codec_type"] == "video");

    let audio_streams: Vec<AudioStreamInfo> = streams
        .iter()
        .filter(|s| s["codec_type"] == "audio")
        .enumerate()
        .map(|(index, stream)| AudioStreamInfo {
            index,
            codec: stream["codec_name"].as_str().unwrap_or("unknown").to_string(),
            sample_rate: stream["sample_rate"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(44100),
            channels: stream["channels"].as_u64().unwrap_or(2) as u32,
        })
        .collect();

    let duration_seconds: f64 = format["duration"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    Ok(VideoInfo {
        path: path.to_path_buf(),
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        duration: Duration::from_secs_f64(duration_seconds),
        width: video_stream.and_then(|s| s["width"].as_u64()).unwrap_or(0) as u32,
        height: video_stream.and_then(|s| s["height"].as_u64()).unwrap_or(0) as u32,
        fps: video_stream
            .and_then(|s| s["r_frame_rate"].as_str())
            .and_then(parse_frame_rate)
            .unwrap_or(0.0),
        format: format["format_name"].as_str().unwrap_or("unknown").to_string(),
        audio_streams,
    })
}

/// "30000/1001" or "25"
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => rate.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720, "r_frame_rate": "30000/1001"},
            {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "channels": 2}
        ],
        "format": {"duration": "93.5", "format_name": "mov,mp4,m4a"}
    }"#;

    #[test]
    fn test_upload_extensions() {
        let processor = VideoProcessor::new();
        assert_eq!(processor.supported_extension("workout.MOV"), Some("mov".to_string()));
        assert_eq!(processor.supported_extension("clip.mp4"), Some("mp4".to_string()));
        assert_eq!(processor.supported_extension("old.avi"), Some("avi".to_string()));
        assert_eq!(processor.supported_extension("notes.txt"), None);
        assert_eq!(processor.supported_extension("noext"), None);
        assert!(processor.is_supported(Path::new("/tmp/a/b.mp4")));
    }

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(Path::new("/videos/session.mp4"), PROBE_JSON).unwrap();
        assert_eq!(info.filename, "session.mp4");
        assert_eq!(info.width, 1280);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!((info.duration_secs() - 93.5).abs() < 1e-9);
        assert!(info.has_audio());
        assert_eq!(info.audio_streams[0].sample_rate, 48000);
    }

    #[test]
    fn test_parse_probe_output_without_audio() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 640, "height": 480}], "format": {}}"#;
        let info = parse_probe_output(Path::new("silent.mov"), json).unwrap();
        assert!(!info.has_audio());
        assert_eq!(info.duration_secs(), 0.0);
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }
}
