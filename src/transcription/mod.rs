pub mod transcript;
pub mod whisper;

pub use transcript::{Transcript, TranscriptCache, TranscriptSegment};
pub use whisper::{WhisperBackend, WhisperTranscriber};
