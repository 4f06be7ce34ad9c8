use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A normalized aesthetic or listening signal supplied by the integration
/// collaborator after it has completed its own authorization and fetching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ExternalSignal {
    Visual(VisualSignal),
    Audio(AudioSignal),
}

/// Summary of a visual board: dominant colors, text keywords and mood scores
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VisualSignal {
    /// `#rrggbb` hex colors
    #[serde(default)]
    pub dominant_colors: Vec<String>,
    #[serde(default)]
    pub text_keywords: Vec<String>,
    /// mood -> [0, 1]
    #[serde(default)]
    pub mood_scores: BTreeMap<String, f64>,
}

/// Summary of listening history
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioSignal {
    /// music genre -> number of tracks tagged with it
    #[serde(default)]
    pub genre_histogram: BTreeMap<String, u32>,
    pub energy: f64,
    pub valence: f64,
    pub acousticness: f64,
}

/// Per-user genre scores in [0, 1].
///
/// Backed by an ordered map so that equal inputs serialize to identical bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct GenreAffinity(BTreeMap<String, f64>);

impl GenreAffinity {
    pub fn new(scores: BTreeMap<String, f64>) -> Self {
        Self(scores)
    }

    /// Affinity for a genre, matched case-insensitively
    pub fn get(&self, genre: &str) -> Option<f64> {
        let genre = genre.trim();
        self.0.get(genre).copied().or_else(|| {
            self.0
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(genre))
                .map(|(_, score)| *score)
        })
    }

    /// Genres scoring at or above `threshold`, strongest first
    pub fn preferred_genres(&self, threshold: f64) -> Vec<String> {
        let mut preferred: Vec<(&String, f64)> = self
            .0
            .iter()
            .filter(|(_, score)| **score >= threshold)
            .map(|(genre, score)| (genre, *score))
            .collect();
        preferred.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        preferred.into_iter().map(|(genre, _)| genre.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_tagged_serialization() {
        let json = r##"{"source":"visual","dominant_colors":["#000000"],"mood_scores":{"dark":0.5}}"##;
        let signal: ExternalSignal = serde_json::from_str(json).unwrap();
        match signal {
            ExternalSignal::Visual(visual) => {
                assert_eq!(visual.dominant_colors, vec!["#000000"]);
                assert!(visual.text_keywords.is_empty());
                assert_eq!(visual.mood_scores.get("dark"), Some(&0.5));
            }
            ExternalSignal::Audio(_) => panic!("expected a visual signal"),
        }
    }

    #[test]
    fn test_affinity_lookup_ignores_case() {
        let affinity = GenreAffinity::new(BTreeMap::from([("Horror".to_string(), 0.6)]));
        assert_eq!(affinity.get("horror"), Some(0.6));
        assert_eq!(affinity.get("Romance"), None);
    }

    #[test]
    fn test_preferred_genres_strongest_first() {
        let affinity = GenreAffinity::new(BTreeMap::from([
            ("Horror".to_string(), 0.5),
            ("Mystery".to_string(), 0.9),
            ("Poetry".to_string(), 0.1),
        ]));
        assert_eq!(affinity.preferred_genres(0.4), vec!["Mystery", "Horror"]);
    }
}
