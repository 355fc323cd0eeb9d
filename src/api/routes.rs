use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;
use crate::middleware::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        // Scores
        .route(
            "/matches/:user_a/:user_b/score",
            get(handlers::get_match_score),
        )
        // Candidates and recommendations
        .route("/users/:user_id/candidates", get(handlers::get_candidates))
        .route(
            "/users/:user_id/recommendations/songs",
            get(handlers::get_song_recommendations),
        )
        .route(
            "/users/:user_id/recommendations/users",
            get(handlers::get_user_recommendations),
        )
        .route(
            "/users/:user_id/recommendations/refresh",
            post(handlers::refresh_recommendations),
        )
        // Recalculation
        .route("/users/:user_id/signals", post(handlers::signal_changed))
        .route("/recalculation/status", get(handlers::recalculation_status))
}
