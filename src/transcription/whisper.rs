use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::transcript::{Transcript, TranscriptCache, TranscriptSegment};
use crate::config::TranscriptionConfig;
use crate::processing::Transcriber;

/// Whisper command-line flavours, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhisperBackend {
    /// whisper.cpp via Homebrew
    WhisperCli,
    WhisperCpp,
    /// OpenAI Whisper (Python)
    Python,
}

impl WhisperBackend {
    pub const ALL: [WhisperBackend; 3] = [
        WhisperBackend::WhisperCli,
        WhisperBackend::WhisperCpp,
        WhisperBackend::Python,
    ];

    pub fn command(&self) -> &'static str {
        match self {
            WhisperBackend::WhisperCli => "whisper-cli",
            WhisperBackend::WhisperCpp => "whisper-cpp",
            WhisperBackend::Python => "whisper",
        }
    }

    fn is_cpp(&self) -> bool {
        !matches!(self, WhisperBackend::Python)
    }
}

/// Transcribes audio by shelling out to a local Whisper installation.
///
/// Results are cached next to the audio as `transcript.txt` and
/// `transcript.json`; a cached transcript is returned without running
/// Whisper again.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    config: TranscriptionConfig,
    /// Initial prompt, usually the movement names
    prompt: Option<String>,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Transcribe `audio_path`, reading and filling the cache in `cache_dir`
    pub async fn transcribe_cached(&self, audio_path: &Path, cache_dir: &Path) -> Result<Transcript> {
        let cache = TranscriptCache::new(cache_dir);
        if let Some(transcript) = cache.load().await? {
            info!("♻️  Reusing cached transcript ({} segments)", transcript.segments.len());
            return Ok(transcript);
        }

        let start_time = Instant::now();
        info!("🎤 Starting Whisper transcription for: {}", audio_path.display());
        info!("⚙️  Model: {}, GPU: {}", self.config.model, self.config.use_gpu);
        if let Some(prompt) = &self.prompt {
            info!("🏋️ Using movement prompt: {}", prompt);
        }

        tokio::fs::create_dir_all(cache_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("whisper_")
            .tempdir_in(cache_dir)
            .context("cannot create Whisper scratch directory")?;

        let transcript = self.run_whisper_command(audio_path, scratch.path()).await?;
        cache.store(&transcript).await?;

        info!(
            "🎉 Transcription completed in {:.1}s: {} characters, {} segments",
            start_time.elapsed().as_secs_f64(),
            transcript.text.len(),
            transcript.segments.len()
        );

        Ok(transcript)
    }

    /// Run Whisper command-line tool with automatic backend detection
    async fn run_whisper_command(&self, audio_path: &Path, output_dir: &Path) -> Result<Transcript> {
        info!("🔍 Detecting available Whisper backends...");

        for backend in WhisperBackend::ALL {
            if Self::check_command_available(backend.command()).await {
                info!("✅ Found {} backend, using it for transcription", backend.command());
                let cmd = if backend.is_cpp() {
                    self.whisper_cpp_command(backend, audio_path, output_dir)
                } else {
                    self.python_whisper_command(audio_path, output_dir)
                };
                return self.execute_command_and_parse(cmd, audio_path, output_dir, backend).await;
            }
            debug!("❌ {} not available", backend.command());
        }

        error!("❌ No Whisper backend found!");
        Err(anyhow!("No Whisper backend found. Please install whisper.cpp or openai-whisper"))
    }

    fn whisper_cpp_command(&self, backend: WhisperBackend, audio_path: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(backend.command());
        let output_base = output_dir.join(file_stem(audio_path));

        cmd.arg("-f")
            .arg(audio_path)
            .arg("-oj")
            .arg("-of")
            .arg(&output_base)
            .arg("-t")
            .arg(self.config.threads.max(1).to_string());

        match self.resolve_model_path() {
            Some(model_path) => {
                info!("🎯 Using model: {}", model_path.display());
                cmd.arg("-m").arg(model_path);
            }
            None => warn!("⚠️  No ggml model found for '{}', using backend default", self.config.model),
        }

        if let Some(prompt) = &self.prompt {
            cmd.arg("--prompt").arg(prompt);
        }
        if let Some(language) = &self.config.language {
            cmd.arg("-l").arg(language);
        }
        cmd
    }

    fn python_whisper_command(&self, audio_path: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(WhisperBackend::Python.command());

        cmd.arg(audio_path)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_format")
            .arg("json")
            .arg("--word_timestamps")
            .arg("True")
            .arg("--verbose")
            .arg("False")
            .arg("--fp16")
            .arg("False");

        if let Some(prompt) = &self.prompt {
            cmd.arg("--initial_prompt").arg(prompt);
        }
        if let Some(language) = &self.config.language {
            cmd.arg("--language").arg(language);
        }
        if !self.config.use_gpu {
            cmd.arg("--device").arg("cpu");
        }
        cmd
    }

    /// First existing ggml file for the configured model
    fn resolve_model_path(&self) -> Option<PathBuf> {
        let file_name = format!("ggml-{}.bin", self.config.model);
        [
            self.config.model_dir.join(&file_name),
            PathBuf::from("/usr/local/share/whisper-cpp").join(&file_name),
            PathBuf::from("/opt/homebrew/share/whisper-cpp").join(&file_name),
        ]
        .into_iter()
        .find(|path| path.exists())
    }

    async fn execute_command_and_parse(
        &self,
        mut cmd: Command,
        audio_path: &Path,
        output_dir: &Path,
        backend: WhisperBackend,
    ) -> Result<Transcript> {
        let name = backend.command();
        let timeout_duration = Duration::from_secs(self.config.timeout as u64);
        let start_time = Instant::now();

        debug!("Executing command: {:?}", cmd);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {} command", name))?;

        // whisper reports progress on stderr
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        debug!("Whisper stderr: {}", line.trim());
                    }
                }
            });
        }

        let status = match tokio::time::timeout(timeout_duration, child.wait()).await {
            Ok(status) => status.with_context(|| format!("{} command execution error", name))?,
            Err(_) => {
                error!(
                    "⏰ {} command timed out after {:.1}s (limit: {}s)",
                    name,
                    start_time.elapsed().as_secs_f64(),
                    self.config.timeout
                );
                let _ = child.kill().await;
                return Err(anyhow!("{} command timed out after {} seconds", name, self.config.timeout));
            }
        };

        if !status.success() {
            error!("❌ {} command failed with exit code: {}", name, status);
            return Err(anyhow!("{} transcription failed with exit code: {}", name, status));
        }
        info!("✅ {} finished in {:.1}s", name, start_time.elapsed().as_secs_f64());

        let json_path = find_output_json(audio_path, output_dir).await?;
        let json_content = tokio::fs::read_to_string(&json_path).await?;
        parse_whisper_output(&json_content)
            .with_context(|| format!("Failed to parse {} JSON output", name))
    }

    /// Check if a command is available
    async fn check_command_available(cmd_name: &str) -> bool {
        Command::new(cmd_name)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Name of the first installed backend
    pub async fn check_availability() -> Result<String> {
        for backend in WhisperBackend::ALL {
            if Self::check_command_available(backend.command()).await {
                return Ok(format!("{} available", backend.command()));
            }
        }

        Err(anyhow!(
            "No Whisper backend found. Please install:\n\
            - whisper.cpp (recommended): https://github.com/ggerganov/whisper.cpp\n\
            - Or OpenAI Whisper: pip install openai-whisper"
        ))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio_path: &Path, cache_dir: &Path) -> Result<Vec<TranscriptSegment>> {
        Ok(self.transcribe_cached(audio_path, cache_dir).await?.segments)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio".to_string())
}

/// `<stem>.json` if present, otherwise any JSON file in `output_dir`
async fn find_output_json(audio_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    let expected = output_dir.join(format!("{}.json", file_stem(audio_path)));
    if expected.exists() {
        return Ok(expected);
    }

    let mut entries = tokio::fs::read_dir(output_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            return Ok(path);
        }
    }
    Err(anyhow!("No Whisper JSON output found in {}", output_dir.display()))
}

/// Convert either whisper.cpp (`transcription` array) or Python Whisper
/// (`segments` array) JSON into a [`Transcript`].
pub fn parse_whisper_output(json: &str) -> Result<Transcript> {
    let output: WhisperOutput = serde_json::from_str(json)?;

    let language = output
        .result
        .and_then(|r| r.language)
        .or(output.language);

    let segments: Vec<TranscriptSegment> = if !output.transcription.is_empty() {
        debug!("📊 whisper.cpp JSON format with {} segments", output.transcription.len());
        output
            .transcription
            .into_iter()
            .map(|seg| {
                let start = parse_timestamp(&seg.timestamps.from)
                    .unwrap_or(seg.offsets.from as f64 / 1000.0);
                let end = parse_timestamp(&seg.timestamps.to)
                    .unwrap_or(seg.offsets.to as f64 / 1000.0);
                TranscriptSegment::new(start, end, seg.text.trim())
            })
            .collect()
    } else {
        debug!("📊 Python Whisper JSON format with {} segments", output.segments.len());
        output
            .segments
            .into_iter()
            .map(|seg| TranscriptSegment::new(seg.start, seg.end, seg.text.trim()))
            .collect()
    };

    let mut transcript = Transcript::from_segments(segments, language);
    if let Some(text) = output.text.filter(|t| !t.trim().is_empty()) {
        transcript.text = text;
    }
    Ok(transcript)
}

/// "HH:MM:SS,mmm" to seconds
fn parse_timestamp(timestamp: &str) -> Result<f64> {
    let (time_part, millis) = timestamp
        .split_once(',')
        .ok_or_else(|| anyhow!("Invalid timestamp format: {}", timestamp))?;
    let milliseconds: f64 = millis.parse::<f64>()? / 1000.0;

    let components: Vec<&str> = time_part.split(':').collect();
    if components.len() != 3 {
        return Err(anyhow!("Invalid time format: {}", time_part));
    }

    let hours: f64 = components[0].parse()?;
    let minutes: f64 = components[1].parse()?;
    let seconds: f64 = components[2].parse()?;

    Ok(hours * 3600.0 + minutes * 60.0 + seconds + milliseconds)
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    transcription: Vec<WhisperCppSegment>,
    #[serde(default)]
    result: Option<WhisperResult>,
}

#[derive(Debug, Deserialize)]
struct WhisperResult {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperCppSegment {
    timestamps: WhisperTimestamps,
    offsets: WhisperOffsets,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperTimestamps {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: u64,
    to: u64,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}
