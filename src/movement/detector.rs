use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use tracing::{debug, info};

use super::normalize::Normalizer;
use super::similarity::token_set_ratio;
use crate::error::DetectionError;
use crate::transcription::TranscriptSegment;

/// Seconds of lead-in added before a matched segment
pub const PRE_ROLL_SECS: f64 = 2.0;
/// Seconds of follow-through added after a matched segment
pub const POST_ROLL_SECS: f64 = 8.0;

/// Default similarity threshold (0-100)
pub const DEFAULT_THRESHOLD: u8 = 80;

/// A moment in the video where a movement is called out.
///
/// The window is the source segment padded by [`PRE_ROLL_SECS`] and
/// [`POST_ROLL_SECS`]. It is not clamped, so `start_time` can be negative
/// and `end_time` can run past the end of the video.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct MovementWindow {
    pub movement: String,
    pub start_time: f64,
    pub end_time: f64,
    pub description: String,
    pub similarity_score: u8,
}

impl MovementWindow {
    pub fn from_segment(movement: &str, segment: &TranscriptSegment, similarity_score: u8) -> Self {
        Self {
            movement: movement.to_string(),
            start_time: segment.start - PRE_ROLL_SECS,
            end_time: segment.end + POST_ROLL_SECS,
            description: segment.text.clone(),
            similarity_score,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Matched windows keyed by movement, in vocabulary order.
///
/// Every vocabulary entry has a key, possibly with no windows. Serializes
/// as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    entries: Vec<(String, Vec<MovementWindow>)>,
}

impl DetectionResult {
    /// Empty result with one key per distinct vocabulary entry
    pub fn with_vocabulary<S: AsRef<str>>(vocabulary: &[S]) -> Self {
        let mut entries: Vec<(String, Vec<MovementWindow>)> = Vec::with_capacity(vocabulary.len());
        for movement in vocabulary {
            let movement = movement.as_ref();
            if !entries.iter().any(|(name, _)| name == movement) {
                entries.push((movement.to_string(), Vec::new()));
            }
        }
        Self { entries }
    }

    /// Append a window under its own movement key. Returns false when the
    /// movement is not part of this result.
    pub fn push(&mut self, window: MovementWindow) -> bool {
        match self.entries.iter_mut().find(|(name, _)| *name == window.movement) {
            Some((_, windows)) => {
                windows.push(window);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, movement: &str) -> Option<&[MovementWindow]> {
        self.entries
            .iter()
            .find(|(name, _)| name == movement)
            .map(|(_, windows)| windows.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MovementWindow])> {
        self.entries
            .iter()
            .map(|(name, windows)| (name.as_str(), windows.as_slice()))
    }

    pub fn movements(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// All windows, movement by movement
    pub fn windows(&self) -> impl Iterator<Item = &MovementWindow> {
        self.entries.iter().flat_map(|(_, windows)| windows.iter())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_windows(&self) -> usize {
        self.entries.iter().map(|(_, windows)| windows.len()).sum()
    }
}

impl Serialize for DetectionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (movement, windows) in &self.entries {
            map.serialize_entry(movement, windows)?;
        }
        map.end()
    }
}

/// Finds vocabulary movements in transcript segments by fuzzy matching.
pub struct MovementDetector {
    threshold: u8,
    normalizer: Normalizer,
}

impl MovementDetector {
    /// Scores never exceed 100, so a threshold above 100 matches nothing.
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            normalizer: Normalizer::new(),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Match every segment against the vocabulary.
    ///
    /// The vocabulary is scanned in the given order and the first movement
    /// whose score reaches the threshold claims the segment, so a segment
    /// yields at most one window.
    pub fn detect<S: AsRef<str>>(
        &self,
        segments: &[TranscriptSegment],
        vocabulary: &[S],
    ) -> Result<DetectionResult, DetectionError> {
        for (index, segment) in segments.iter().enumerate() {
            validate_segment(index, segment)?;
        }

        let mut result = DetectionResult::with_vocabulary(vocabulary);
        let normalized_vocabulary: Vec<(&str, String)> = result
            .movements()
            .map(|movement| (movement, self.normalizer.normalize(movement)))
            .collect();

        let mut matches = Vec::new();
        for segment in segments {
            let normalized_text = self.normalizer.normalize(&segment.text);

            for (movement, normalized_movement) in &normalized_vocabulary {
                let score = token_set_ratio(normalized_movement, &normalized_text);
                if score >= self.threshold {
                    debug!(
                        "🎯 '{}' matched '{}' at {:.1}s (score {})",
                        movement, segment.text, segment.start, score
                    );
                    matches.push(MovementWindow::from_segment(movement, segment, score));
                    break;
                }
            }
        }

        for window in matches {
            result.push(window);
        }

        for (movement, windows) in result.iter() {
            info!("🏋️ Found {} segment(s) for '{}'", windows.len(), movement);
        }

        Ok(result)
    }
}

impl Default for MovementDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

fn validate_segment(index: usize, segment: &TranscriptSegment) -> Result<(), DetectionError> {
    let invalid = |reason: &str| DetectionError::InvalidSegment {
        index,
        reason: reason.to_string(),
    };

    if !segment.start.is_finite() {
        return Err(invalid("start is not a finite number"));
    }
    if !segment.end.is_finite() {
        return Err(invalid("end is not a finite number"));
    }
    if segment.end < segment.start {
        return Err(invalid("end is before start"));
    }
    Ok(())
}

/// One-shot detection with a fresh detector
pub fn detect<S: AsRef<str>>(
    segments: &[TranscriptSegment],
    vocabulary: &[S],
    threshold: u8,
) -> Result<DetectionResult, DetectionError> {
    MovementDetector::new(threshold).detect(segments, vocabulary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(start, end, text)
    }

    #[test]
    fn test_chair_squat_callout() {
        let segments = vec![segment(10.0, 12.0, "now do chair squats")];
        let result = detect(&segments, &["chair squats"], 80).unwrap();

        let windows = result.get("chair squats").unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start_time, 8.0);
        assert_eq!(windows[0].end_time, 20.0);
        assert_eq!(windows[0].description, "now do chair squats");
        assert!(windows[0].similarity_score >= 80);
    }

    #[test]
    fn test_unrelated_text_yields_empty_list() {
        let segments = vec![segment(10.0, 12.0, "grab some water and take a breather")];
        let result = detect(&segments, &["chair squats"], 80).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.get("chair squats").unwrap().len(), 0);
    }

    #[test]
    fn test_every_vocabulary_entry_has_a_key() {
        let vocabulary = ["arm swings", "goblet squat", "chest press"];
        let result = detect(&[], &vocabulary, 80).unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.movements().collect::<Vec<_>>(), vocabulary);
        assert_eq!(result.total_windows(), 0);
    }

    #[test]
    fn test_first_vocabulary_match_wins() {
        let segments = vec![segment(30.0, 33.0, "goblet squat into a chest press")];

        let result = detect(&segments, &["goblet squat", "chest press"], 80).unwrap();
        assert_eq!(result.get("goblet squat").unwrap().len(), 1);
        assert!(result.get("chest press").unwrap().is_empty());

        let result = detect(&segments, &["chest press", "goblet squat"], 80).unwrap();
        assert_eq!(result.get("chest press").unwrap().len(), 1);
        assert!(result.get("goblet squat").unwrap().is_empty());
    }

    #[test]
    fn test_windows_are_padded_and_unclamped() {
        let segments = vec![
            segment(0.5, 1.5, "start with arm swings"),
            segment(40.0, 44.25, "more arm swings"),
        ];
        let result = detect(&segments, &["arm swings"], 80).unwrap();

        let windows = result.get("arm swings").unwrap();
        assert_eq!(windows.len(), 2);
        for (window, seg) in windows.iter().zip(&segments) {
            assert_eq!(window.start_time, seg.start - PRE_ROLL_SECS);
            assert_eq!(window.end_time, seg.end + POST_ROLL_SECS);
            assert_eq!(window.movement, "arm swings");
        }
        assert!(windows[0].start_time < 0.0);
    }

    #[test]
    fn test_windows_keep_transcript_order() {
        let segments = vec![
            segment(5.0, 6.0, "chair squats"),
            segment(15.0, 16.0, "rest"),
            segment(25.0, 26.0, "chair squats again"),
        ];
        let result = detect(&segments, &["chair squats"], 80).unwrap();
        let starts: Vec<f64> = result.windows().map(|w| w.start_time).collect();
        assert_eq!(starts, vec![3.0, 23.0]);
    }

    #[test]
    fn test_invalid_segment_is_rejected() {
        let segments = vec![
            segment(1.0, 2.0, "chair squats"),
            segment(f64::NAN, 4.0, "chair squats"),
        ];
        let err = detect(&segments, &["chair squats"], 80).unwrap_err();
        assert!(matches!(err, DetectionError::InvalidSegment { index: 1, .. }));

        let segments = vec![segment(5.0, 4.0, "chair squats")];
        assert!(detect(&segments, &["chair squats"], 80).is_err());
    }

    #[test]
    fn test_zero_threshold_matches_first_movement() {
        let segments = vec![segment(1.0, 2.0, "anything at all")];
        let result = detect(&segments, &["plank", "dips"], 0).unwrap();
        assert_eq!(result.get("plank").unwrap().len(), 1);
        assert!(result.get("dips").unwrap().is_empty());
    }

    #[test]
    fn test_threshold_above_hundred_matches_nothing() {
        let segments = vec![segment(10.0, 12.0, "chair squats")];
        let detector = MovementDetector::new(150);
        assert_eq!(detector.threshold(), 150);

        let result = detector.detect(&segments, &["chair squats"]).unwrap();
        assert_eq!(result.total_windows(), 0);
        assert_eq!(detect(&segments, &["chair squats"], 100).unwrap().total_windows(), 1);
    }

    #[test]
    fn test_serializes_in_vocabulary_order() {
        let segments = vec![segment(10.0, 12.0, "now do chair squats")];
        let result = detect(&segments, &["underhand row", "chair squats", "arm swings"], 80).unwrap();

        let json = serde_json::to_string(&result).unwrap();
        let row = json.find("underhand row").unwrap();
        let squat = json.find("\"chair squats\"").unwrap();
        let swings = json.find("arm swings").unwrap();
        assert!(row < squat && squat < swings);
        assert!(json.contains("\"similarity_score\""));
    }
}
