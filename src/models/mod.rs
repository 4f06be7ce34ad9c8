pub mod item;
pub mod personality;
pub mod rating;
pub mod recommendation;
pub mod signal;
pub mod user_profile;

/// Identifier of a user as issued by the host system
pub type UserId = String;

/// Identifier of a catalog item as issued by the host system
pub type ItemId = String;

pub use item::{Catalog, CatalogEntry, ItemMetadata};
pub use personality::{
    BookLength, ContentComplexity, NarrativeStyle, PersonalityProfile, PersonalityTrait,
    QuizResponse, ReadingPace, ReadingRecord, ReadingStyle, TraitScores,
};
pub use rating::{Rating, RatingEvent};
pub use recommendation::{
    CollabScore, ContentScore, ExternalScore, Omission, Recommendation, RecommendationList,
    ScoreBreakdown, SignalSource, SourceOmission, SourceOutcome, SourceScore, Strategy,
};
pub use signal::{AudioSignal, ExternalSignal, GenreAffinity, VisualSignal};
pub use user_profile::{UserPreferences, UserProfile};
