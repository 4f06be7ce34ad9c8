use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::{make_request_span, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Ingestion
        .route("/ratings", post(handlers::ingest_rating))
        .route("/items", post(handlers::upsert_items))
        .route("/users/:user_id/profile", put(handlers::set_profile))
        .route("/users/:user_id/signals", post(handlers::push_signals))
        .route(
            "/users/:user_id/personality",
            put(handlers::set_personality).get(handlers::get_personality),
        )
        // Reads
        .route("/users/:user_id/affinities", get(handlers::get_affinities))
        .route(
            "/users/:user_id/recommendations",
            get(handlers::get_recommendations),
        )
        // Operations
        .route("/admin/retrain", post(handlers::retrain))
        .route("/cache/users/:user_id", delete(handlers::invalidate_user))
        .route("/cache", delete(handlers::invalidate_prefix))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
