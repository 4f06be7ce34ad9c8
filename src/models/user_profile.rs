use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{ItemId, UserId};

/// Explicit taste preferences a user has stated
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    /// Genres the user prefers
    #[serde(default)]
    pub preferred_genres: Vec<String>,
    /// Authors the user follows
    #[serde(default)]
    pub favorite_authors: Vec<String>,
}

impl UserPreferences {
    /// Creates empty user preferences
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a preferred genre, ignoring case-insensitive duplicates
    pub fn add_genre(&mut self, genre: &str) {
        push_unique(&mut self.preferred_genres, genre);
    }

    /// Adds a favorite author, ignoring case-insensitive duplicates
    pub fn add_author(&mut self, author: &str) {
        push_unique(&mut self.favorite_authors, author);
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if value.is_empty() || values.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        return;
    }
    values.push(value.to_string());
}

/// Everything the content index needs to score candidates for one user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    /// Every item the user has rated; never recommended back
    pub history: BTreeSet<ItemId>,
    /// Items rated at or above the positive threshold
    pub liked: Vec<ItemId>,
    pub preferences: UserPreferences,
}

impl UserProfile {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn prefers_genre(&self, genre: &str) -> bool {
        self.preferences
            .preferred_genres
            .iter()
            .any(|g| g.eq_ignore_ascii_case(genre.trim()))
    }

    pub fn follows_author(&self, author: &str) -> bool {
        self.preferences
            .favorite_authors
            .iter()
            .any(|a| a.eq_ignore_ascii_case(author.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_genre_deduplicates_case_insensitively() {
        let mut prefs = UserPreferences::new();
        prefs.add_genre("Horror");
        prefs.add_genre("horror");
        prefs.add_genre(" ");
        assert_eq!(prefs.preferred_genres, vec!["Horror"]);
    }

    #[test]
    fn test_profile_matches_ignore_case() {
        let mut profile = UserProfile::new("u1");
        profile.preferences.add_author("Shirley Jackson");
        profile.preferences.add_genre("Gothic");

        assert!(profile.follows_author("shirley jackson"));
        assert!(profile.prefers_genre("GOTHIC"));
        assert!(!profile.prefers_genre("Romance"));
    }
}
