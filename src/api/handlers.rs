use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::{redis::RECOMMENDATIONS_PREFIX, UpsertOutcome};
use crate::error::{AppError, AppResult};
use crate::models::{
    ExternalSignal, GenreAffinity, ItemMetadata, PersonalityProfile, QuizResponse, RatingEvent,
    ReadingRecord, RecommendationList, UserPreferences,
};
use crate::services::{RetrainReport, Rgb, ServiceStatus};

use super::AppState;

const DEFAULT_RECOMMENDATION_COUNT: usize = 10;

// Request/Response types

#[derive(Debug, Serialize)]
pub struct RatingResponse {
    pub outcome: &'static str,
}

impl From<UpsertOutcome> for RatingResponse {
    fn from(outcome: UpsertOutcome) -> Self {
        let outcome = match outcome {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Replaced => "replaced",
            UpsertOutcome::Stale => "stale",
        };
        Self { outcome }
    }
}

#[derive(Debug, Serialize)]
pub struct UpsertItemsResponse {
    pub upserted: usize,
}

/// A sampled image to run through color clustering
#[derive(Debug, Deserialize)]
pub struct PixelSample {
    /// `[r, g, b]` triples
    pub pixels: Vec<[u8; 3]>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PushSignalsRequest {
    #[serde(default)]
    pub signals: Vec<ExternalSignal>,
    #[serde(default)]
    pub images: Vec<PixelSample>,
}

#[derive(Debug, Serialize)]
pub struct PushSignalsResponse {
    pub stored: usize,
    pub affinities: GenreAffinity,
}

#[derive(Debug, Deserialize)]
pub struct PersonalityRequest {
    #[serde(default)]
    pub responses: Vec<QuizResponse>,
    /// Defaults to the user's rated items when omitted
    #[serde(default)]
    pub history: Option<Vec<ReadingRecord>>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateQuery {
    pub prefix: Option<String>,
}

// Handlers

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.service.status().await)
}

/// Ingest one rating event
pub async fn ingest_rating(
    State(state): State<AppState>,
    Json(event): Json<RatingEvent>,
) -> AppResult<Json<RatingResponse>> {
    let outcome = state.service.ingest_rating(event).await?;
    Ok(Json(outcome.into()))
}

/// Add or replace item metadata
pub async fn upsert_items(
    State(state): State<AppState>,
    Json(items): Json<Vec<ItemMetadata>>,
) -> AppResult<(StatusCode, Json<UpsertItemsResponse>)> {
    let upserted = state.service.upsert_items(items).await?;
    Ok((StatusCode::CREATED, Json(UpsertItemsResponse { upserted })))
}

/// Replace a user's stated genre and author preferences
pub async fn set_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(preferences): Json<UserPreferences>,
) -> AppResult<Json<UserPreferences>> {
    let stored = state.service.set_preferences(&user_id, preferences).await?;
    Ok(Json(stored))
}

/// Push normalized signals, or raw pixel samples to be analyzed into visual signals
pub async fn push_signals(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<PushSignalsRequest>,
) -> AppResult<(StatusCode, Json<PushSignalsResponse>)> {
    if request.signals.is_empty() && request.images.is_empty() {
        return Err(AppError::InvalidInput(
            "Provide at least one signal or image".to_string(),
        ));
    }

    let mapper = state.service.mapper();
    let mut signals = request.signals;
    for image in request.images {
        let pixels: Vec<Rgb> = image
            .pixels
            .iter()
            .map(|[r, g, b]| Rgb::new(*r, *g, *b))
            .collect();
        let mut visual = mapper.analyze_pixels(&pixels);
        visual.text_keywords = image.keywords;
        signals.push(ExternalSignal::Visual(visual));
    }

    let stored = state.service.push_signals(&user_id, signals).await?;
    let affinities = state.service.genre_affinities(&user_id).await?;

    tracing::info!(user_id = %user_id, stored, genres = affinities.len(), "Signals stored");
    Ok((
        StatusCode::CREATED,
        Json(PushSignalsResponse { stored, affinities }),
    ))
}

/// Analyze a personality quiz and store the resulting profile
pub async fn set_personality(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<PersonalityRequest>,
) -> AppResult<Json<PersonalityProfile>> {
    let profile = state
        .service
        .analyze_personality(&user_id, request.responses, request.history)
        .await?;
    Ok(Json(profile))
}

/// The stored personality profile for a user
pub async fn get_personality(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<PersonalityProfile>> {
    state
        .service
        .personality(&user_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No personality profile for user '{}'", user_id)))
}

/// Genre affinities derived from the user's signals
pub async fn get_affinities(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<GenreAffinity>> {
    Ok(Json(state.service.genre_affinities(&user_id).await?))
}

/// Ranked recommendations for a user
pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<RecommendationQuery>,
) -> AppResult<Json<RecommendationList>> {
    let n = query.n.unwrap_or(DEFAULT_RECOMMENDATION_COUNT);
    let list = state.service.recommend(&user_id, n).await?;
    Ok(Json(list))
}

/// Retrain both models and drop every cached list
pub async fn retrain(State(state): State<AppState>) -> AppResult<Json<RetrainReport>> {
    Ok(Json(state.service.retrain().await?))
}

/// Drop one user's cached recommendations
pub async fn invalidate_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.service.invalidate_user(&user_id).await;
    StatusCode::NO_CONTENT
}

/// Drop cached entries by key prefix; defaults to every recommendation list
pub async fn invalidate_prefix(
    State(state): State<AppState>,
    Query(query): Query<InvalidateQuery>,
) -> StatusCode {
    let prefix = query
        .prefix
        .unwrap_or_else(|| RECOMMENDATIONS_PREFIX.to_string());
    state.service.invalidate_prefix(&prefix).await;
    StatusCode::NO_CONTENT
}
