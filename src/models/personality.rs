use serde::{Deserialize, Serialize};

/// One of the Big Five personality dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityTrait {
    Openness,
    Conscientiousness,
    Extraversion,
    Agreeableness,
    Neuroticism,
}

impl PersonalityTrait {
    pub const ALL: [PersonalityTrait; 5] = [
        PersonalityTrait::Openness,
        PersonalityTrait::Conscientiousness,
        PersonalityTrait::Extraversion,
        PersonalityTrait::Agreeableness,
        PersonalityTrait::Neuroticism,
    ];
}

/// Answer to a single quiz question, on a 0-5 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResponse {
    pub question_id: u32,
    #[serde(rename = "trait")]
    pub personality_trait: PersonalityTrait,
    pub value: f64,
}

/// A book the user has read, as far as personality inference cares
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    #[serde(default)]
    pub genre: Option<String>,
    /// Fraction of the book finished, 0-1
    #[serde(default)]
    pub completion: Option<f64>,
    #[serde(default)]
    pub rating: Option<u8>,
}

/// Big Five scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitScores {
    pub openness: f64,
    pub conscientiousness: f64,
    pub extraversion: f64,
    pub agreeableness: f64,
    pub neuroticism: f64,
}

impl TraitScores {
    /// Every trait at the neutral midpoint
    pub fn neutral() -> Self {
        Self::from_fn(|_| 0.5)
    }

    pub fn from_fn(mut score: impl FnMut(PersonalityTrait) -> f64) -> Self {
        Self {
            openness: score(PersonalityTrait::Openness),
            conscientiousness: score(PersonalityTrait::Conscientiousness),
            extraversion: score(PersonalityTrait::Extraversion),
            agreeableness: score(PersonalityTrait::Agreeableness),
            neuroticism: score(PersonalityTrait::Neuroticism),
        }
    }

    pub fn get(&self, personality_trait: PersonalityTrait) -> f64 {
        match personality_trait {
            PersonalityTrait::Openness => self.openness,
            PersonalityTrait::Conscientiousness => self.conscientiousness,
            PersonalityTrait::Extraversion => self.extraversion,
            PersonalityTrait::Agreeableness => self.agreeableness,
            PersonalityTrait::Neuroticism => self.neuroticism,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentComplexity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeStyle {
    Balanced,
    DialogueHeavy,
    CharacterDriven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookLength {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingPace {
    Moderate,
    Structured,
}

/// Reading preferences implied by a set of trait scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingStyle {
    /// Deduplicated, in trait order
    pub preferred_genres: Vec<String>,
    pub content_complexity: ContentComplexity,
    pub narrative_style: NarrativeStyle,
    pub book_length: BookLength,
    pub reading_pace: ReadingPace,
    pub social_reading: bool,
    pub experimental_content: bool,
}

/// Result of analyzing one user's quiz and reading history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    pub traits: TraitScores,
    pub reading_style: ReadingStyle,
    /// Kinds of books suited to the dominant traits, at most ten
    pub themes: Vec<String>,
    pub summary: String,
}
