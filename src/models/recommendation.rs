use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::{ItemId, UserId};

/// The three independent signal sources merged by the hybrid scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Collaborative,
    Content,
    External,
}

impl Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalSource::Collaborative => write!(f, "collaborative"),
            SignalSource::Content => write!(f, "content"),
            SignalSource::External => write!(f, "external"),
        }
    }
}

/// A raw per-source score for one item
pub trait SourceScore {
    const SOURCE: SignalSource;

    fn item_id(&self) -> &str;
    fn raw_score(&self) -> f64;
}

/// Predicted rating from neighbor aggregation, on the 1-5 rating scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollabScore {
    pub item_id: ItemId,
    pub predicted_rating: f64,
}

/// Weighted content score in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentScore {
    pub item_id: ItemId,
    pub score: f64,
}

/// Genre affinity of the item's genre, in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalScore {
    pub item_id: ItemId,
    pub affinity: f64,
}

impl SourceScore for CollabScore {
    const SOURCE: SignalSource = SignalSource::Collaborative;

    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn raw_score(&self) -> f64 {
        self.predicted_rating
    }
}

impl SourceScore for ContentScore {
    const SOURCE: SignalSource = SignalSource::Content;

    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn raw_score(&self) -> f64 {
        self.score
    }
}

impl SourceScore for ExternalScore {
    const SOURCE: SignalSource = SignalSource::External;

    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn raw_score(&self) -> f64 {
        self.affinity
    }
}

/// Why a source contributed nothing to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Omission {
    ModelNotTrained,
    ColdStart,
    NoProfile,
    TimedOut,
    Unavailable(String),
}

/// What one source produced for a request
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome<T> {
    Scored(Vec<T>),
    Omitted(Omission),
}

impl<T> SourceOutcome<T> {
    pub fn is_empty(&self) -> bool {
        match self {
            SourceOutcome::Scored(scores) => scores.is_empty(),
            SourceOutcome::Omitted(_) => true,
        }
    }

    pub fn omission(&self) -> Option<&Omission> {
        match self {
            SourceOutcome::Scored(_) => None,
            SourceOutcome::Omitted(omission) => Some(omission),
        }
    }
}

/// Per-source normalized contribution before weighting.
///
/// `None` marks a source that was omitted for the whole request; `Some(0.0)`
/// marks a source that ran but did not score this item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub collab: Option<f64>,
    pub content: Option<f64>,
    pub external: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: ItemId,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Hybrid,
    Popularity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOmission {
    pub source: SignalSource,
    #[serde(flatten)]
    pub omission: Omission,
}

/// Ranked recommendations for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationList {
    pub user_id: UserId,
    pub strategy: Strategy,
    pub recommendations: Vec<Recommendation>,
    pub omitted: Vec<SourceOmission>,
    pub generated_at: DateTime<Utc>,
}

impl RecommendationList {
    /// Keeps only the first `n` recommendations
    pub fn truncated(mut self, n: usize) -> Self {
        self.recommendations.truncate(n);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omission_serialization() {
        let omitted = SourceOmission {
            source: SignalSource::External,
            omission: Omission::Unavailable("timeout".to_string()),
        };
        let json = serde_json::to_value(&omitted).unwrap();
        assert_eq!(json["source"], "external");
        assert_eq!(json["reason"], "unavailable");
        assert_eq!(json["detail"], "timeout");
    }

    #[test]
    fn test_omitted_outcome_counts_as_empty() {
        let outcome: SourceOutcome<CollabScore> = SourceOutcome::Omitted(Omission::ColdStart);
        assert!(outcome.is_empty());
        assert_eq!(outcome.omission(), Some(&Omission::ColdStart));
    }
}
