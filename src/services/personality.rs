use std::collections::BTreeSet;

use crate::{
    error::{AppError, AppResult},
    models::{
        BookLength, ContentComplexity, NarrativeStyle, PersonalityProfile, PersonalityTrait,
        QuizResponse, ReadingPace, ReadingRecord, ReadingStyle, TraitScores, UserPreferences,
    },
};

/// Quiz answers are given on a 0-5 scale
const MAX_QUIZ_VALUE: f64 = 5.0;
const MAX_THEMES: usize = 10;
/// Below this openness, shorter familiar reads are preferred
const LOW_OPENNESS: f64 = 0.3;

/// What a dominant trait implies for reading taste
struct TraitRule {
    personality_trait: PersonalityTrait,
    /// Strictly above this the trait is dominant
    threshold: f64,
    genres: &'static [&'static str],
    themes: &'static [&'static str],
    description: &'static str,
}

static RULES: [TraitRule; 5] = [
    TraitRule {
        personality_trait: PersonalityTrait::Openness,
        threshold: 0.7,
        genres: &[
            "Experimental Fiction",
            "Science Fiction",
            "Philosophy",
            "Magical Realism",
            "Avant-garde",
        ],
        themes: &[
            "Experimental literature and avant-garde fiction",
            "Cross-cultural narratives and diverse perspectives",
            "Genre-blending and unconventional storytelling",
            "Philosophy and abstract concepts in fiction",
        ],
        description: "highly open to new experiences",
    },
    TraitRule {
        personality_trait: PersonalityTrait::Conscientiousness,
        threshold: 0.7,
        genres: &[
            "Non-fiction",
            "Biography",
            "History",
            "Self-help",
            "Educational",
            "Technical",
        ],
        themes: &[
            "Non-fiction and educational content",
            "Biographies of successful individuals",
            "Self-improvement and productivity books",
            "Historical and factual narratives",
        ],
        description: "very organized and goal-oriented",
    },
    TraitRule {
        personality_trait: PersonalityTrait::Extraversion,
        threshold: 0.7,
        genres: &[
            "Contemporary Fiction",
            "Romance",
            "Adventure",
            "Social Commentary",
        ],
        themes: &[
            "Books with strong social themes",
            "Dialogue-driven narratives",
            "Popular contemporary fiction",
            "Books that spark discussion and debate",
        ],
        description: "socially engaged",
    },
    TraitRule {
        personality_trait: PersonalityTrait::Agreeableness,
        threshold: 0.7,
        genres: &[
            "Romance",
            "Family Saga",
            "Coming-of-age",
            "Inspirational",
            "Feel-good Fiction",
        ],
        themes: &[
            "Character-driven stories with emotional depth",
            "Books exploring relationships and human connection",
            "Uplifting and inspirational narratives",
            "Stories with positive, hopeful endings",
        ],
        description: "empathetic and cooperative",
    },
    TraitRule {
        personality_trait: PersonalityTrait::Neuroticism,
        threshold: 0.6,
        genres: &[
            "Psychological Fiction",
            "Drama",
            "Memoir",
            "Self-help",
            "Mental Health",
        ],
        themes: &[
            "Psychological fiction and introspective narratives",
            "Books dealing with mental health and personal growth",
            "Cathartic and emotionally intense stories",
            "Memoirs and personal transformation stories",
        ],
        description: "emotionally sensitive",
    },
];

fn rule(personality_trait: PersonalityTrait) -> &'static TraitRule {
    // RULES covers every variant
    &RULES[PersonalityTrait::ALL
        .iter()
        .position(|t| *t == personality_trait)
        .unwrap_or(0)]
}

fn is_dominant(traits: &TraitScores, personality_trait: PersonalityTrait) -> bool {
    traits.get(personality_trait) > rule(personality_trait).threshold
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Big Five analysis of quiz answers and reading history, mapped onto the
/// genres the content recommender understands.
#[derive(Debug, Clone, Copy)]
pub struct PersonalityAnalyzer {
    /// Share of the blended score taken from the quiz when history is present
    quiz_weight: f64,
}

impl Default for PersonalityAnalyzer {
    fn default() -> Self {
        Self { quiz_weight: 0.7 }
    }
}

impl PersonalityAnalyzer {
    pub fn new(quiz_weight: f64) -> Self {
        Self {
            quiz_weight: quiz_weight.clamp(0.0, 1.0),
        }
    }

    /// Scores the quiz, blends in traits inferred from `history` and derives
    /// reading preferences.
    ///
    /// With no quiz answers the history alone decides; with neither the
    /// request is rejected.
    pub fn analyze(
        &self,
        responses: &[QuizResponse],
        history: &[ReadingRecord],
    ) -> AppResult<PersonalityProfile> {
        if responses.is_empty() && history.is_empty() {
            return Err(AppError::InvalidInput(
                "Provide quiz responses or reading history".to_string(),
            ));
        }
        if let Some(bad) = responses
            .iter()
            .find(|r| !r.value.is_finite() || !(0.0..=MAX_QUIZ_VALUE).contains(&r.value))
        {
            return Err(AppError::InvalidInput(format!(
                "Quiz answer {} must be between 0 and 5 (got {})",
                bad.question_id, bad.value
            )));
        }

        let traits = match (responses.is_empty(), history.is_empty()) {
            (false, true) => Self::score_quiz(responses),
            (true, _) => Self::infer_from_history(history),
            (false, false) => {
                self.combine(&Self::score_quiz(responses), &Self::infer_from_history(history))
            }
        };

        Ok(PersonalityProfile {
            traits,
            reading_style: Self::reading_style(&traits),
            themes: Self::themes(&traits),
            summary: Self::summary(&traits),
        })
    }

    /// Mean normalized answer per trait; unanswered traits sit at 0.5
    pub fn score_quiz(responses: &[QuizResponse]) -> TraitScores {
        TraitScores::from_fn(|personality_trait| {
            mean(
                responses
                    .iter()
                    .filter(|r| r.personality_trait == personality_trait)
                    .map(|r| r.value / MAX_QUIZ_VALUE),
            )
            .unwrap_or(0.5)
        })
    }

    /// Infers traits from what was read and how.
    ///
    /// Openness blends genre diversity with the share of exploratory genres;
    /// conscientiousness is the mean completion; agreeableness the mean
    /// rating; extraversion and neuroticism the share of books in their genre
    /// tables. Traits with no evidence stay at 0.5.
    pub fn infer_from_history(history: &[ReadingRecord]) -> TraitScores {
        let genres: Vec<&str> = history
            .iter()
            .filter_map(|record| record.genre.as_deref())
            .map(str::trim)
            .filter(|genre| !genre.is_empty())
            .collect();

        let share = |personality_trait: PersonalityTrait| -> Option<f64> {
            let table = rule(personality_trait).genres;
            mean(genres.iter().map(|genre| {
                if table.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                    1.0
                } else {
                    0.0
                }
            }))
        };

        let diversity = if genres.len() < 2 {
            0.5
        } else {
            let distinct: BTreeSet<String> = genres.iter().map(|g| g.to_lowercase()).collect();
            (distinct.len() - 1) as f64 / (genres.len() - 1) as f64
        };

        TraitScores {
            openness: share(PersonalityTrait::Openness)
                .map_or(0.5, |exploratory| (exploratory + diversity) / 2.0),
            conscientiousness: mean(
                history
                    .iter()
                    .filter_map(|record| record.completion)
                    .filter(|c| c.is_finite())
                    .map(|c| c.clamp(0.0, 1.0)),
            )
            .unwrap_or(0.5),
            extraversion: share(PersonalityTrait::Extraversion).unwrap_or(0.5),
            agreeableness: mean(
                history
                    .iter()
                    .filter_map(|record| record.rating)
                    .filter(|rating| (1..=5).contains(rating))
                    .map(|rating| f64::from(rating) / MAX_QUIZ_VALUE),
            )
            .unwrap_or(0.5),
            neuroticism: share(PersonalityTrait::Neuroticism).unwrap_or(0.5),
        }
    }

    /// Weighted blend of quiz and history scores
    pub fn combine(&self, quiz: &TraitScores, history: &TraitScores) -> TraitScores {
        TraitScores::from_fn(|t| {
            self.quiz_weight * quiz.get(t) + (1.0 - self.quiz_weight) * history.get(t)
        })
    }

    pub fn reading_style(traits: &TraitScores) -> ReadingStyle {
        let mut genres = UserPreferences::new();
        for dominant in RULES.iter().filter(|r| is_dominant(traits, r.personality_trait)) {
            dominant.genres.iter().for_each(|genre| genres.add_genre(genre));
        }

        let open = is_dominant(traits, PersonalityTrait::Openness);
        let conscientious = is_dominant(traits, PersonalityTrait::Conscientiousness);
        let extravert = is_dominant(traits, PersonalityTrait::Extraversion);

        let narrative_style = if is_dominant(traits, PersonalityTrait::Agreeableness) {
            NarrativeStyle::CharacterDriven
        } else if extravert {
            NarrativeStyle::DialogueHeavy
        } else {
            NarrativeStyle::Balanced
        };

        let book_length = if conscientious {
            BookLength::Long
        } else if traits.openness < LOW_OPENNESS {
            BookLength::Short
        } else {
            BookLength::Medium
        };

        ReadingStyle {
            preferred_genres: genres.preferred_genres,
            content_complexity: if open {
                ContentComplexity::High
            } else {
                ContentComplexity::Medium
            },
            narrative_style,
            book_length,
            reading_pace: if conscientious {
                ReadingPace::Structured
            } else {
                ReadingPace::Moderate
            },
            social_reading: extravert,
            experimental_content: open,
        }
    }

    fn themes(traits: &TraitScores) -> Vec<String> {
        RULES
            .iter()
            .filter(|r| is_dominant(traits, r.personality_trait))
            .flat_map(|r| r.themes.iter().map(|theme| theme.to_string()))
            .take(MAX_THEMES)
            .collect()
    }

    fn summary(traits: &TraitScores) -> String {
        let dominant: Vec<&str> = RULES
            .iter()
            .filter(|r| is_dominant(traits, r.personality_trait))
            .map(|r| r.description)
            .collect();

        if dominant.is_empty() {
            return "You have a balanced personality profile with moderate scores across all traits."
                .to_string();
        }

        let mut summary = format!(
            "Your reading personality shows that you are {}.",
            dominant.join(", ")
        );
        if is_dominant(traits, PersonalityTrait::Openness) {
            summary.push_str(" You are likely to enjoy experimental and diverse literature.");
        }
        if is_dominant(traits, PersonalityTrait::Conscientiousness) {
            summary.push_str(
                " You prefer structured, informative content and tend to finish what you start.",
            );
        }
        if is_dominant(traits, PersonalityTrait::Extraversion) {
            summary.push_str(" You enjoy books you can discuss with others.");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(question_id: u32, personality_trait: PersonalityTrait, value: f64) -> QuizResponse {
        QuizResponse {
            question_id,
            personality_trait,
            value,
        }
    }

    fn read(genre: &str) -> ReadingRecord {
        ReadingRecord {
            genre: Some(genre.to_string()),
            ..ReadingRecord::default()
        }
    }

    fn traits_with(personality_trait: PersonalityTrait, score: f64) -> TraitScores {
        TraitScores::from_fn(|t| if t == personality_trait { score } else { 0.5 })
    }

    #[test]
    fn test_quiz_scores_average_per_trait() {
        let scores = PersonalityAnalyzer::score_quiz(&[
            answer(1, PersonalityTrait::Openness, 5.0),
            answer(2, PersonalityTrait::Openness, 3.0),
            answer(3, PersonalityTrait::Neuroticism, 1.0),
        ]);

        assert!((scores.openness - 0.8).abs() < 1e-12);
        assert!((scores.neuroticism - 0.2).abs() < 1e-12);
        assert_eq!(scores.conscientiousness, 0.5);
        assert_eq!(scores.extraversion, 0.5);
    }

    #[test]
    fn test_openness_threshold_is_strict() {
        let at = PersonalityAnalyzer::reading_style(&traits_with(PersonalityTrait::Openness, 0.7));
        assert!(at.preferred_genres.is_empty());
        assert!(!at.experimental_content);

        let above =
            PersonalityAnalyzer::reading_style(&traits_with(PersonalityTrait::Openness, 0.71));
        assert_eq!(
            above.preferred_genres,
            vec![
                "Experimental Fiction",
                "Science Fiction",
                "Philosophy",
                "Magical Realism",
                "Avant-garde"
            ]
        );
        assert!(above.experimental_content);
        assert_eq!(above.content_complexity, ContentComplexity::High);
    }

    #[test]
    fn test_neuroticism_uses_lower_threshold() {
        let style =
            PersonalityAnalyzer::reading_style(&traits_with(PersonalityTrait::Neuroticism, 0.65));
        assert_eq!(
            style.preferred_genres,
            vec!["Psychological Fiction", "Drama", "Memoir", "Self-help", "Mental Health"]
        );

        let calm =
            PersonalityAnalyzer::reading_style(&traits_with(PersonalityTrait::Neuroticism, 0.6));
        assert!(calm.preferred_genres.is_empty());
    }

    #[test]
    fn test_overlapping_genres_are_listed_once() {
        let traits = TraitScores {
            conscientiousness: 0.9,
            extraversion: 0.9,
            agreeableness: 0.9,
            neuroticism: 0.9,
            ..TraitScores::neutral()
        };
        let style = PersonalityAnalyzer::reading_style(&traits);

        let count = |genre: &str| style.preferred_genres.iter().filter(|g| *g == genre).count();
        assert_eq!(count("Romance"), 1);
        assert_eq!(count("Self-help"), 1);
        assert_eq!(style.narrative_style, NarrativeStyle::CharacterDriven);
        assert_eq!(style.book_length, BookLength::Long);
        assert_eq!(style.reading_pace, ReadingPace::Structured);
        assert!(style.social_reading);
    }

    #[test]
    fn test_low_openness_prefers_short_books() {
        let style = PersonalityAnalyzer::reading_style(&traits_with(PersonalityTrait::Openness, 0.2));
        assert_eq!(style.book_length, BookLength::Short);
        assert_eq!(style.narrative_style, NarrativeStyle::Balanced);
    }

    #[test]
    fn test_history_inference() {
        let history = vec![
            ReadingRecord {
                completion: Some(1.0),
                rating: Some(5),
                ..read("Memoir")
            },
            ReadingRecord {
                completion: Some(0.5),
                rating: Some(3),
                ..read("Drama")
            },
            read("drama"),
            read("Science Fiction"),
        ];

        let traits = PersonalityAnalyzer::infer_from_history(&history);

        assert!((traits.conscientiousness - 0.75).abs() < 1e-12);
        assert!((traits.agreeableness - 0.8).abs() < 1e-12);
        assert!((traits.neuroticism - 0.75).abs() < 1e-12);
        assert_eq!(traits.extraversion, 0.0);
        // diversity (3 - 1) / (4 - 1), exploratory share 1/4
        assert!((traits.openness - (2.0 / 3.0 + 0.25) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_history_is_neutral() {
        assert_eq!(
            PersonalityAnalyzer::infer_from_history(&[]),
            TraitScores::neutral()
        );
    }

    #[test]
    fn test_quiz_and_history_are_blended() {
        let analyzer = PersonalityAnalyzer::default();
        let profile = analyzer
            .analyze(
                &[answer(1, PersonalityTrait::Neuroticism, 5.0)],
                &[read("Memoir"), read("Romance")],
            )
            .unwrap();

        // 0.7 * 1.0 + 0.3 * 0.5
        assert!((profile.traits.neuroticism - 0.85).abs() < 1e-12);
        assert!(profile
            .reading_style
            .preferred_genres
            .contains(&"Memoir".to_string()));
        assert!(profile.summary.contains("emotionally sensitive"));
    }

    #[test]
    fn test_invalid_answers_are_rejected() {
        let analyzer = PersonalityAnalyzer::default();
        assert!(matches!(
            analyzer.analyze(&[answer(7, PersonalityTrait::Openness, 6.0)], &[]),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            analyzer.analyze(&[], &[]),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_balanced_profile_has_no_themes() {
        let profile = PersonalityAnalyzer::default()
            .analyze(&[answer(1, PersonalityTrait::Extraversion, 2.5)], &[])
            .unwrap();

        assert!(profile.themes.is_empty());
        assert!(profile.reading_style.preferred_genres.is_empty());
        assert!(profile.summary.starts_with("You have a balanced"));
    }

    #[test]
    fn test_themes_are_capped() {
        let traits = TraitScores::from_fn(|_| 0.95);
        let profile_themes = PersonalityAnalyzer::themes(&traits);
        assert_eq!(profile_themes.len(), 10);
        assert_eq!(profile_themes[0], "Experimental literature and avant-garde fiction");
    }
}
