//! Workout Clipper
//!
//! Finds the moments a coach calls out an exercise in a workout video and
//! cuts a short GIF for each one. A job runs audio extraction,
//! transcription, movement detection and clip rendering in sequence and
//! reports every stage on a per-job progress bus.

pub mod audio;
pub mod config;
pub mod error;
pub mod movement;
pub mod processing;
pub mod progress;
pub mod render;
pub mod transcription;
pub mod video;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for easy access
pub use crate::audio::FfmpegAudioExtractor;
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{DetectionError, PipelineError};
pub use crate::movement::{detect, DetectionResult, MovementDetector, MovementVocabulary, MovementWindow};
pub use crate::processing::{AudioExtractor, CancellationToken, ClipRenderer, Job, Pipeline, Transcriber};
pub use crate::progress::{Message, ProgressBus, ProgressEvent, Stage, Subscription};
pub use crate::render::{ClipWindow, FfmpegClipRenderer, RenderSettings, RenderedClip, TrimOutcome};
pub use crate::transcription::{TranscriptSegment, WhisperTranscriber};
pub use crate::video::{VideoInfo, VideoProcessor};
