use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::movement::{MovementVocabulary, DEFAULT_THRESHOLD};

/// Parse a numeric environment override, naming the variable on failure
fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}

/// Configuration for the workout clipper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Movement vocabulary and matching
    pub detection: DetectionConfig,

    /// Audio extraction settings
    pub audio: AudioConfig,

    /// Whisper settings
    pub transcription: TranscriptionConfig,

    /// GIF clip settings
    pub render: RenderConfig,

    /// Working and output directories
    pub output: OutputConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Movements to look for, in priority order
    pub movements: Vec<String>,

    /// Optional file with one movement per line; replaces `movements`
    pub movements_file: Option<PathBuf>,

    /// Minimum similarity score (0-100) for a match
    pub similarity_threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Target sample rate for transcription
    pub target_sample_rate: u32,

    /// File name of the extracted track inside the work dir
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Whisper model name
    pub model: String,

    /// Directory holding ggml model files for whisper.cpp
    pub model_dir: PathBuf,

    /// Language hint
    pub language: Option<String>,

    /// Timeout for one Whisper run (seconds)
    pub timeout: u32,

    /// Threads passed to whisper.cpp
    pub threads: usize,

    /// Enable GPU acceleration for Python Whisper
    pub use_gpu: bool,

    /// Prime Whisper with the movement names
    pub use_movement_prompt: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Frames per second of the output GIFs
    pub fps: u32,

    /// Playback speed-up applied to each clip
    pub speed_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Scratch space for audio and transcripts
    pub work_dir: PathBuf,

    /// Where rendered GIFs are written
    pub clips_dir: PathBuf,

    /// Where uploaded videos are stored
    pub uploads_dir: PathBuf,

    /// Log level
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Directory served at `/` and `/static`
    pub static_dir: PathBuf,

    /// Seconds a finished job's progress log is kept for late subscribers
    pub progress_retention_secs: u64,

    /// Seconds before trimmed clips and zip bundles are deleted
    pub temp_file_ttl_secs: u64,

    /// Largest accepted upload, in MiB
    pub max_upload_mb: u64,

    pub enable_cors: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            movements: MovementVocabulary::new().movements().to_vec(),
            movements_file: None,
            similarity_threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Optimal for Whisper
            file_name: "audio.wav".to_string(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
            model_dir: PathBuf::from("models"),
            language: None,
            timeout: 3600, // 60 minutes for long sessions
            threads: num_cpus::get().min(8),
            use_gpu: false,
            use_movement_prompt: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            speed_multiplier: 2.0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("temp"),
            clips_dir: PathBuf::from("output/gifs"),
            uploads_dir: PathBuf::from("temp/uploads"),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: PathBuf::from("static"),
            progress_retention_secs: 300,
            temp_file_ttl_secs: 5,
            max_upload_mb: 4096,
            enable_cors: true,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_paths = [
            "workout-clipper.toml",
            "config/workout-clipper.toml",
            "/etc/workout-clipper/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load a specific configuration file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path, e))?;
        let config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        tracing::info!("📄 Loaded configuration from: {}", path);
        Ok(config)
    }

    /// Defaults overridden by `WORKOUT_CLIPPER_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(movements) = lookup("WORKOUT_CLIPPER_MOVEMENTS") {
            let movements: Vec<String> = movements
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !movements.is_empty() {
                self.detection.movements = movements;
            }
        }

        if let Some(threshold) = lookup("WORKOUT_CLIPPER_THRESHOLD") {
            self.detection.similarity_threshold = parse_env("WORKOUT_CLIPPER_THRESHOLD", &threshold)?;
        }

        if let Some(fps) = lookup("WORKOUT_CLIPPER_FPS") {
            self.render.fps = parse_env("WORKOUT_CLIPPER_FPS", &fps)?;
        }

        if let Some(speed) = lookup("WORKOUT_CLIPPER_SPEED") {
            self.render.speed_multiplier = parse_env("WORKOUT_CLIPPER_SPEED", &speed)?;
        }

        if let Some(model) = lookup("WORKOUT_CLIPPER_MODEL") {
            self.transcription.model = model;
        }

        if let Some(dir) = lookup("WORKOUT_CLIPPER_WORK_DIR") {
            self.output.work_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("WORKOUT_CLIPPER_CLIPS_DIR") {
            self.output.clips_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("WORKOUT_CLIPPER_UPLOADS_DIR") {
            self.output.uploads_dir = PathBuf::from(dir);
        }

        if let Some(log_level) = lookup("WORKOUT_CLIPPER_LOG_LEVEL") {
            self.output.log_level = log_level;
        }

        if let Some(port) = lookup("WORKOUT_CLIPPER_PORT") {
            self.server.port = parse_env("WORKOUT_CLIPPER_PORT", &port)?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.detection.similarity_threshold > 100 {
            return Err(anyhow!("similarity_threshold must be between 0 and 100"));
        }

        if self.detection.movements.iter().all(|m| m.trim().is_empty())
            && self.detection.movements_file.is_none()
        {
            return Err(anyhow!("at least one movement must be configured"));
        }

        if self.render.fps == 0 {
            return Err(anyhow!("fps must be greater than 0"));
        }

        if !(self.render.speed_multiplier.is_finite() && self.render.speed_multiplier > 0.0) {
            return Err(anyhow!("speed_multiplier must be a positive number"));
        }

        if self.audio.target_sample_rate == 0 {
            return Err(anyhow!("target_sample_rate must be greater than 0"));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Configured vocabulary, read from `movements_file` when one is set
    pub async fn vocabulary(&self) -> Result<MovementVocabulary> {
        match &self.detection.movements_file {
            Some(path) => MovementVocabulary::from_file(path).await,
            None => Ok(MovementVocabulary::from_list(self.detection.movements.iter().cloned())),
        }
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Workout Clipper Configuration:\n\
            - Movements: {}\n\
            - Similarity Threshold: {}\n\
            - GIF: {} fps at {}x speed\n\
            - Whisper Model: {}\n\
            - Work Directory: {}\n\
            - Clips Directory: {}",
            self.detection.movements.join(", "),
            self.detection.similarity_threshold,
            self.render.fps,
            self.render.speed_multiplier,
            self.transcription.model,
            self.output.work_dir.display(),
            self.output.clips_dir.display()
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_movements<I, S>(mut self, movements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.detection.movements = movements.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.config.detection.similarity_threshold = threshold;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.config.render.fps = fps;
        self
    }

    pub fn with_speed(mut self, speed_multiplier: f64) -> Self {
        self.config.render.speed_multiplier = speed_multiplier;
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.config.transcription.model = model;
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.work_dir = dir;
        self
    }

    pub fn with_clips_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.clips_dir = dir;
        self
    }

    pub fn with_uploads_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.uploads_dir = dir;
        self
    }

    pub fn with_static_dir(mut self, dir: PathBuf) -> Self {
        self.config.server.static_dir = dir;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
