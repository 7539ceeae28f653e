use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// One timed piece of speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Full transcription of one audio track, as cached on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Build from segments, joining their text
    pub fn from_segments(segments: Vec<TranscriptSegment>, language: Option<String>) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            text,
            language,
            segments,
        }
    }
}

/// `transcript.txt` / `transcript.json` pair inside a work directory.
///
/// When the JSON file exists the transcript is loaded from it and Whisper is
/// not run again.
#[derive(Debug, Clone)]
pub struct TranscriptCache {
    text_path: PathBuf,
    json_path: PathBuf,
}

impl TranscriptCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            text_path: dir.join("transcript.txt"),
            json_path: dir.join("transcript.json"),
        }
    }

    pub fn text_path(&self) -> &Path {
        &self.text_path
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    pub fn exists(&self) -> bool {
        self.json_path.exists()
    }

    /// Read a cached transcript. A file that does not parse is an error,
    /// never a cache miss.
    pub async fn load(&self) -> Result<Option<Transcript>> {
        if !self.exists() {
            return Ok(None);
        }

        info!("📂 Loading existing transcription from {}", self.json_path.display());
        let content = tokio::fs::read_to_string(&self.json_path)
            .await
            .with_context(|| format!("cannot read {}", self.json_path.display()))?;
        let transcript: Transcript = serde_json::from_str(&content)
            .with_context(|| format!("malformed transcript cache {}", self.json_path.display()))?;
        Ok(Some(transcript))
    }

    pub async fn store(&self, transcript: &Transcript) -> Result<()> {
        if let Some(parent) = self.json_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.text_path, &transcript.text).await?;
        info!("💾 Transcription text saved to {}", self.text_path.display());

        let json = serde_json::to_string_pretty(transcript)?;
        tokio::fs::write(&self.json_path, json).await?;
        info!(
            "💾 Transcription segments saved to {} ({} segments)",
            self.json_path.display(),
            transcript.segments.len()
        );
        Ok(())
    }
}
