//! Error types for the workout clip pipeline

use crate::progress::Stage;

/// Result type for pipeline runs
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A failed pipeline run. Every variant knows which stage it belongs to.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("{stage} stage failed: audio extraction failed: {cause}")]
    AudioExtraction { stage: Stage, cause: String },

    #[error("{stage} stage failed: transcription failed: {cause}")]
    Transcription { stage: Stage, cause: String },

    #[error("{stage} stage failed: clip rendering failed: {cause}")]
    Render { stage: Stage, cause: String },

    #[error("transcript segment {index} is invalid: {reason}")]
    InvalidTranscript { index: usize, reason: String },

    #[error("job cancelled before the {stage} stage")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    pub fn audio(cause: anyhow::Error) -> Self {
        PipelineError::AudioExtraction {
            stage: Stage::Audio,
            cause: format!("{:#}", cause),
        }
    }

    pub fn transcription(cause: anyhow::Error) -> Self {
        PipelineError::Transcription {
            stage: Stage::Transcribe,
            cause: format!("{:#}", cause),
        }
    }

    pub fn render(cause: anyhow::Error) -> Self {
        PipelineError::Render {
            stage: Stage::Render,
            cause: format!("{:#}", cause),
        }
    }

    /// Stage the failure is attributed to
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::AudioExtraction { stage, .. }
            | PipelineError::Transcription { stage, .. }
            | PipelineError::Render { stage, .. }
            | PipelineError::Cancelled { stage } => *stage,
            PipelineError::InvalidTranscript { .. } => Stage::Detect,
        }
    }
}

/// Rejected detector input
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("segment {index}: {reason}")]
    InvalidSegment { index: usize, reason: String },
}

impl From<DetectionError> for PipelineError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::InvalidSegment { index, reason } => {
                PipelineError::InvalidTranscript { index, reason }
            }
        }
    }
}
