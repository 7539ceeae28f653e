use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::info;

/// Ordered list of movement names to look for in a transcript.
///
/// Order matters: when a transcript segment matches several movements, the
/// one listed first wins.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementVocabulary {
    movements: Vec<String>,
    prompt_template: String,
}

impl MovementVocabulary {
    /// Vocabulary with the default workout movements
    pub fn new() -> Self {
        Self::from_list(
            [
                "arm swings",
                "chair squats",
                "roll down and roll up",
                "goblet squat",
                "chest press",
                "underhand row",
                "farmer's carry",
            ]
            .iter()
            .map(|m| m.to_string()),
        )
    }

    /// Build from caller-supplied names. Blank entries are skipped and
    /// duplicates keep their first position.
    pub fn from_list<I, S>(movements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocabulary = Self {
            movements: Vec::new(),
            prompt_template: Self::default_prompt_template(),
        };
        for movement in movements {
            vocabulary.add_movement(movement.into());
        }
        vocabulary
    }

    /// Load a vocabulary file: one movement per line, `#` starts a comment.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let vocabulary = Self::parse(&content)?;
        info!(
            "📚 Loaded {} movements from: {}",
            vocabulary.len(),
            path.as_ref().display()
        );
        Ok(vocabulary)
    }

    fn parse(content: &str) -> Result<Self> {
        let vocabulary = Self::from_list(
            content
                .lines()
                .map(|line| line.split('#').next().unwrap_or("").trim())
                .filter(|line| !line.is_empty()),
        );

        if vocabulary.is_empty() {
            return Err(anyhow!("Movement vocabulary file contains no movements"));
        }
        Ok(vocabulary)
    }

    /// Append a movement unless it is blank or already present
    pub fn add_movement(&mut self, movement: String) -> bool {
        let movement = movement.trim().to_string();
        if movement.is_empty() || self.movements.contains(&movement) {
            return false;
        }
        self.movements.push(movement);
        true
    }

    /// Case-insensitive membership check
    pub fn contains(&self, movement: &str) -> bool {
        let needle = movement.trim().to_lowercase();
        self.movements.iter().any(|m| m.to_lowercase() == needle)
    }

    pub fn movements(&self) -> &[String] {
        &self.movements
    }

    pub fn len(&self) -> usize {
        self.movements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }

    /// Initial prompt that primes Whisper with the movement names
    pub fn generate_prompt(&self) -> String {
        self.prompt_template
            .replace("{movements}", &self.movements.join(", "))
    }

    fn default_prompt_template() -> String {
        "Workout instruction video. The coach calls out exercises such as {movements}.".to_string()
    }
}

impl Default for MovementVocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<String>> for MovementVocabulary {
    fn from(movements: Vec<String>) -> Self {
        Self::from_list(movements)
    }
}
