use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::{
    clock::Clock,
    config::Config,
    db::{redis::RECOMMENDATIONS_PREFIX, DurableCache, RatingStore, UpsertOutcome},
    error::{AppError, AppResult},
    models::{
        Catalog, CollabScore, ContentScore, ExternalScore, ExternalSignal, GenreAffinity, ItemId,
        ItemMetadata, Omission, PersonalityProfile, QuizResponse, Rating, RatingEvent,
        ReadingRecord, RecommendationList, SourceOutcome, UserId, UserPreferences, UserProfile,
    },
    services::{
        collaborative::{CollabOutcome, CollaborativeFilter},
        content::ContentIndex,
        hybrid::HybridScorer,
        personality::PersonalityAnalyzer,
        providers::SignalProvider,
        result_cache::ResultCache,
        signals::SignalMapper,
    },
};

/// Summary of one retraining pass
#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    /// `false` when there were no ratings to train on
    pub collaborative_trained: bool,
    pub users: usize,
    pub rated_items: usize,
    pub indexed_items: usize,
    pub vocabulary: usize,
    pub elapsed_ms: u64,
}

/// Point-in-time view of what the engine holds
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub ratings: usize,
    pub items: usize,
    pub collaborative_trained: bool,
    pub collaborative_trained_at: Option<DateTime<Utc>>,
    pub indexed_items: usize,
    pub content_built_at: Option<DateTime<Utc>>,
    pub signal_provider: &'static str,
    pub durable_cache: &'static str,
}

/// Recommendation engine facade.
///
/// Owns the rating store, the two trained models, the signal mapper and the
/// result cache. Created once at startup and shared behind an `Arc`.
pub struct RecommendationService {
    config: Config,
    store: Arc<RatingStore>,
    collaborative: CollaborativeFilter,
    content: ContentIndex,
    mapper: SignalMapper,
    scorer: HybridScorer,
    personality: PersonalityAnalyzer,
    provider: Arc<dyn SignalProvider>,
    durable_name: &'static str,
    cache: ResultCache,
    items: RwLock<BTreeMap<ItemId, ItemMetadata>>,
    preferences: RwLock<HashMap<UserId, UserPreferences>>,
    personalities: RwLock<HashMap<UserId, PersonalityProfile>>,
}

impl RecommendationService {
    pub fn new(
        config: Config,
        provider: Arc<dyn SignalProvider>,
        durable: Arc<dyn DurableCache>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let store = Arc::new(RatingStore::new());
        let durable_name = durable.name();

        Ok(Self {
            collaborative: CollaborativeFilter::new(
                store.clone(),
                config.factorization_rank,
                config.neighbor_count,
            ),
            content: ContentIndex::new(config.vocabulary_cap, config.content_weights()),
            mapper: SignalMapper::new(config.mapper_settings()),
            scorer: HybridScorer::new(config.hybrid_weights())?,
            personality: PersonalityAnalyzer::new(config.personality_quiz_weight),
            cache: ResultCache::new(
                durable,
                clock,
                config.local_cache_capacity,
                config.cache_ttl(),
            ),
            store,
            provider,
            durable_name,
            items: RwLock::new(BTreeMap::new()),
            preferences: RwLock::new(HashMap::new()),
            personalities: RwLock::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn mapper(&self) -> &SignalMapper {
        &self.mapper
    }

    /// Validates and stores a rating, invalidating the user's cached list
    /// when the stored value changed
    #[instrument(skip(self, event), fields(user_id = %event.user_id, item_id = %event.item_id))]
    pub async fn ingest_rating(&self, event: RatingEvent) -> AppResult<UpsertOutcome> {
        let rating = Rating::try_from(event)?;
        let user_id = rating.user_id.clone();

        let outcome = self.store.upsert(rating).await;
        if outcome.changed() {
            self.cache.invalidate(&user_id).await;
        }

        tracing::debug!(?outcome, "Rating ingested");
        Ok(outcome)
    }

    /// Adds or replaces item metadata. The content index picks the changes up
    /// on the next retrain; the catalog sees them immediately.
    pub async fn upsert_items(&self, items: Vec<ItemMetadata>) -> AppResult<usize> {
        if let Some(bad) = items
            .iter()
            .find(|item| item.item_id.trim().is_empty() || item.title.trim().is_empty())
        {
            return Err(AppError::InvalidInput(format!(
                "Item '{}' needs both an id and a title",
                bad.item_id
            )));
        }

        let count = items.len();
        let mut stored = self.items.write().await;
        for item in items {
            stored.insert(item.item_id.clone(), item);
        }

        tracing::info!(upserted = count, catalog = stored.len(), "Item metadata updated");
        Ok(count)
    }

    /// Replaces a user's stated preferences
    pub async fn set_preferences(
        &self,
        user_id: &str,
        preferences: UserPreferences,
    ) -> AppResult<UserPreferences> {
        let mut cleaned = UserPreferences::new();
        preferences
            .preferred_genres
            .iter()
            .for_each(|genre| cleaned.add_genre(genre));
        preferences
            .favorite_authors
            .iter()
            .for_each(|author| cleaned.add_author(author));

        self.preferences
            .write()
            .await
            .insert(user_id.to_string(), cleaned.clone());
        self.cache.invalidate(user_id).await;

        Ok(cleaned)
    }

    /// Analyzes a personality quiz and stores the profile, whose preferred
    /// genres then feed content scoring. Without explicit `history` the
    /// user's ratings and the item catalog stand in for it.
    #[instrument(skip(self, responses, history), fields(answers = responses.len()))]
    pub async fn analyze_personality(
        &self,
        user_id: &str,
        responses: Vec<QuizResponse>,
        history: Option<Vec<ReadingRecord>>,
    ) -> AppResult<PersonalityProfile> {
        let history = match history {
            Some(history) => history,
            None => self.reading_history(user_id).await,
        };
        let profile = self.personality.analyze(&responses, &history)?;

        self.personalities
            .write()
            .await
            .insert(user_id.to_string(), profile.clone());
        self.cache.invalidate(user_id).await;

        tracing::info!(
            user_id = %user_id,
            history = history.len(),
            genres = profile.reading_style.preferred_genres.len(),
            "Personality profile stored"
        );
        Ok(profile)
    }

    pub async fn personality(&self, user_id: &str) -> Option<PersonalityProfile> {
        self.personalities.read().await.get(user_id).cloned()
    }

    async fn reading_history(&self, user_id: &str) -> Vec<ReadingRecord> {
        let ratings = self.store.user_ratings(user_id).await;
        let items = self.items.read().await;
        ratings
            .into_iter()
            .map(|rating| ReadingRecord {
                genre: items.get(&rating.item_id).and_then(|item| item.genre.clone()),
                completion: None,
                rating: Some(rating.score),
            })
            .collect()
    }

    /// Hands normalized signals to the provider and drops the user's cached list
    pub async fn push_signals(
        &self,
        user_id: &str,
        signals: Vec<ExternalSignal>,
    ) -> AppResult<usize> {
        let total = self.provider.accept_signals(user_id, signals).await?;
        self.cache.invalidate(user_id).await;
        Ok(total)
    }

    /// Genre affinities derived from everything the provider holds for a user
    pub async fn genre_affinities(&self, user_id: &str) -> AppResult<GenreAffinity> {
        let signals = self.provider.fetch_signals(user_id).await?;
        Ok(self.mapper.map_to_genre_affinities(&signals))
    }

    /// Rating history, positively-rated items, stated preferences and the
    /// genres implied by the user's personality profile
    pub async fn profile(&self, user_id: &str) -> UserProfile {
        let ratings = self.store.user_ratings(user_id).await;
        let threshold = self.config.positive_rating_threshold;

        let mut profile = UserProfile::new(user_id);
        profile.liked = ratings
            .iter()
            .filter(|rating| rating.score >= threshold)
            .map(|rating| rating.item_id.clone())
            .collect();
        profile.history = ratings.into_iter().map(|rating| rating.item_id).collect();
        profile.preferences = self
            .preferences
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        if let Some(personality) = self.personalities.read().await.get(user_id) {
            for genre in &personality.reading_style.preferred_genres {
                profile.preferences.add_genre(genre);
            }
        }
        profile
    }

    /// Items with metadata plus items only known from ratings
    pub async fn catalog(&self) -> Catalog {
        let counts = self.store.rating_counts().await;
        let items = self.items.read().await;
        Catalog::build(items.values(), &counts)
    }

    /// Top `n` recommendations for a user, served from cache when possible
    #[instrument(skip(self))]
    pub async fn recommend(&self, user_id: &str, n: usize) -> AppResult<RecommendationList> {
        if user_id.trim().is_empty() {
            return Err(AppError::InvalidInput("user_id must not be empty".to_string()));
        }
        if n == 0 {
            return Err(AppError::InvalidInput("n must be at least 1".to_string()));
        }

        let list = self
            .cache
            .get_or_compute(user_id, || self.compute(user_id))
            .await?;
        Ok(list.truncated(n))
    }

    /// Fans out to the three sources and merges them. Computes the longest
    /// list the cache keeps so any smaller `n` can be served from it.
    async fn compute(&self, user_id: &str) -> AppResult<RecommendationList> {
        let start = Instant::now();
        let limit = self.config.max_cached_results;
        let mut profile = self.profile(user_id).await;

        let (collab, affinity) = tokio::join!(
            self.collaborative_source(user_id, limit),
            self.affinity_source(user_id),
        );

        let catalog = self.catalog().await;
        let external = match &affinity {
            Ok(affinity) => {
                for genre in affinity.preferred_genres(self.config.affinity_threshold) {
                    profile.preferences.add_genre(&genre);
                }
                SourceOutcome::Scored(self.external_scores(affinity, &catalog, &profile))
            }
            Err(omission) => SourceOutcome::Omitted(omission.clone()),
        };
        let content = self.content_source(&profile, limit).await;

        let list = self.scorer.combine(
            user_id,
            collab,
            content,
            external,
            &catalog,
            &profile.history,
            limit,
        );

        tracing::info!(
            user_id = %user_id,
            strategy = ?list.strategy,
            results = list.recommendations.len(),
            omitted = list.omitted.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Recommendations computed"
        );
        Ok(list)
    }

    async fn collaborative_source(&self, user_id: &str, n: usize) -> SourceOutcome<CollabScore> {
        let lookup = self.collaborative.get_user_recommendations(user_id, n);
        match tokio::time::timeout(self.config.source_timeout(), lookup).await {
            Ok(Ok(CollabOutcome::Scored(scores))) => SourceOutcome::Scored(scores),
            Ok(Ok(CollabOutcome::ColdStart)) => {
                tracing::debug!(user_id = %user_id, "Cold start user, no collaborative scores");
                SourceOutcome::Omitted(Omission::ColdStart)
            }
            Ok(Err(AppError::ModelNotTrained)) => {
                tracing::warn!("Collaborative model not trained yet");
                SourceOutcome::Omitted(Omission::ModelNotTrained)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Collaborative source failed");
                SourceOutcome::Omitted(Omission::Unavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(user_id = %user_id, "Collaborative source timed out");
                SourceOutcome::Omitted(Omission::TimedOut)
            }
        }
    }

    async fn content_source(&self, profile: &UserProfile, n: usize) -> SourceOutcome<ContentScore> {
        let model = self.content.model().await;
        if model.is_empty() {
            return SourceOutcome::Omitted(Omission::ModelNotTrained);
        }
        if profile.liked.is_empty()
            && profile.preferences.preferred_genres.is_empty()
            && profile.preferences.favorite_authors.is_empty()
        {
            return SourceOutcome::Omitted(Omission::NoProfile);
        }

        let lookup = self.content.get_content_recommendations(profile, n);
        match tokio::time::timeout(self.config.source_timeout(), lookup).await {
            Ok(Ok(scores)) => SourceOutcome::Scored(scores),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Content source failed");
                SourceOutcome::Omitted(Omission::Unavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(user_id = %profile.user_id, "Content source timed out");
                SourceOutcome::Omitted(Omission::TimedOut)
            }
        }
    }

    /// Fetches the user's signals and maps them to genre affinities. Any
    /// failure becomes an omission; the request carries on without it.
    async fn affinity_source(&self, user_id: &str) -> Result<GenreAffinity, Omission> {
        let fetch = self.provider.fetch_signals(user_id);
        let signals = match tokio::time::timeout(self.config.source_timeout(), fetch).await {
            Ok(Ok(signals)) => signals,
            Ok(Err(e)) => {
                tracing::warn!(
                    error = %e,
                    provider = self.provider.name(),
                    user_id = %user_id,
                    "Signal provider failed, continuing without external signals"
                );
                return Err(Omission::Unavailable(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    user_id = %user_id,
                    timeout_ms = self.config.source_timeout_ms,
                    "Signal provider timed out, continuing without external signals"
                );
                return Err(Omission::TimedOut);
            }
        };

        if signals.is_empty() {
            return Err(Omission::NoProfile);
        }
        Ok(self.mapper.map_to_genre_affinities(&signals))
    }

    /// Catalog items whose genre the user has a strong enough affinity for
    fn external_scores(
        &self,
        affinity: &GenreAffinity,
        catalog: &Catalog,
        profile: &UserProfile,
    ) -> Vec<ExternalScore> {
        catalog
            .iter()
            .filter(|entry| !profile.history.contains(&entry.item_id))
            .filter_map(|entry| {
                let score = affinity.get(entry.genre.as_deref()?)?;
                (score >= self.config.affinity_threshold).then(|| ExternalScore {
                    item_id: entry.item_id.clone(),
                    affinity: score,
                })
            })
            .collect()
    }

    /// Retrains the collaborative model, rebuilds the content index and drops
    /// every cached list
    pub async fn retrain(&self) -> AppResult<RetrainReport> {
        let start = Instant::now();

        let model = match self.collaborative.train().await {
            Ok(model) => Some(model),
            Err(AppError::ModelNotTrained) => None,
            Err(e) => return Err(e),
        };

        let corpus: Vec<ItemMetadata> = self.items.read().await.values().cloned().collect();
        let index = self.content.build(corpus).await?;

        self.cache.invalidate_pattern(RECOMMENDATIONS_PREFIX).await;

        let report = RetrainReport {
            collaborative_trained: model.is_some(),
            users: model.as_ref().map_or(0, |m| m.user_count()),
            rated_items: model.as_ref().map_or(0, |m| m.item_count()),
            indexed_items: index.len(),
            vocabulary: index.vocabulary_size(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(?report, "Retrain complete");
        Ok(report)
    }

    /// Retrains every `interval` until the returned handle is aborted
    pub fn spawn_retrain_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.retrain().await {
                    tracing::error!(error = %e, "Scheduled retrain failed");
                }
            }
        })
    }

    pub async fn invalidate_user(&self, user_id: &str) {
        self.cache.invalidate(user_id).await;
    }

    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.cache.invalidate_pattern(prefix).await;
    }

    pub async fn status(&self) -> ServiceStatus {
        let collaborative = self.collaborative.model().await;
        let content = self.content.model().await;

        ServiceStatus {
            ratings: self.store.len().await,
            items: self.items.read().await.len(),
            collaborative_trained: collaborative.is_some(),
            collaborative_trained_at: collaborative.map(|model| model.trained_at()),
            indexed_items: content.len(),
            content_built_at: content.built_at(),
            signal_provider: self.provider.name(),
            durable_cache: self.durable_name,
        }
    }
}
