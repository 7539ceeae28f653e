pub mod detector;
pub mod normalize;
pub mod similarity;
pub mod vocabulary;

pub use detector::{
    detect, DetectionResult, MovementDetector, MovementWindow, DEFAULT_THRESHOLD, POST_ROLL_SECS,
    PRE_ROLL_SECS,
};
pub use normalize::{normalize, Normalizer};
pub use similarity::token_set_ratio;
pub use vocabulary::MovementVocabulary;
