//! Text normalization applied before fuzzy matching

use rust_stemmers::{Algorithm, Stemmer};

/// Upper bound on re-stemming a single token
const MAX_STEM_PASSES: usize = 8;

/// Lower-cases, stems every whitespace-separated token and rejoins them
/// with single spaces.
///
/// A token is re-stemmed until it stops changing, which makes
/// `normalize(normalize(x)) == normalize(x)` hold for real words.
pub struct Normalizer {
    stemmer: Stemmer,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        text.to_lowercase()
            .split_whitespace()
            .map(|token| self.normalize_token(token))
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn normalize_token(&self, token: &str) -> String {
        let mut current = token.to_string();
        for _ in 0..MAX_STEM_PASSES {
            let trimmed = current.trim_matches(|c: char| !c.is_alphanumeric());
            let next = self.stemmer.stem(trimmed).into_owned();
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// One-off normalization
pub fn normalize(text: &str) -> String {
    Normalizer::new().normalize(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stems_plural_and_gerund() {
        assert_eq!(normalize("Chair Squats"), "chair squat");
        assert_eq!(normalize("running"), "run");
        assert_eq!(normalize("arm swings"), "arm swing");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize("  goblet \t  squat \n"), "goblet squat");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_strips_edge_punctuation() {
        assert_eq!(normalize("now do chair squats."), normalize("now do chair squats"));
        assert!(normalize("farmer's carry").starts_with("farmer "));
        assert_eq!(normalize("-- ..."), "");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let normalizer = Normalizer::new();
        let samples = [
            "Roll down and roll up",
            "farmer's carry",
            "Underhand rows, then chest presses!",
            "generalizations agreed conflated abilities",
            " Okay, let's get into our goblet squats for the next minute.",
        ];
        for sample in samples {
            let once = normalizer.normalize(sample);
            let twice = normalizer.normalize(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", sample);
        }
    }
}
