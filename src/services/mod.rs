pub mod collaborative;
pub mod content;
pub mod hybrid;
pub mod personality;
pub mod providers;
pub mod recommendations;
pub mod result_cache;
pub mod signals;

pub use collaborative::{CollabOutcome, CollaborativeFilter, LatentModel};
pub use content::{ContentIndex, ContentModel, ContentWeights};
pub use hybrid::{HybridScorer, HybridWeights};
pub use personality::PersonalityAnalyzer;
pub use providers::{InMemorySignalProvider, SignalProvider};
pub use recommendations::{RecommendationService, RetrainReport, ServiceStatus};
pub use result_cache::ResultCache;
pub use signals::{MapperSettings, MoodThresholds, Rgb, SignalMapper};
