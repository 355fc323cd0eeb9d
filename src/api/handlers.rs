use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    middleware::RequestId,
    models::{Candidate, CandidateFilters, MatchScore, SongRecommendations, UserRecommendations},
    services::{
        candidates::{INTERACTIVE_CANDIDATE_LIMIT, RECALCULATION_CANDIDATE_LIMIT},
        recommendations::MAX_RECOMMENDATION_LIMIT,
        RecalculationStatus,
    },
};

use super::AppState;

const DEFAULT_RECOMMENDATION_LIMIT: usize = 20;

// Request types

#[derive(Debug, Default, Deserialize)]
pub struct CandidateQuery {
    pub limit: Option<usize>,
    pub gender: Option<String>,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    pub max_distance: Option<f64>,
}

impl CandidateQuery {
    fn validate(&self) -> AppResult<()> {
        if let (Some(min), Some(max)) = (self.min_age, self.max_age) {
            if min > max {
                return Err(AppError::InvalidInput(format!(
                    "min_age ({}) must not exceed max_age ({})",
                    min, max
                )));
            }
        }
        if let Some(distance) = self.max_distance {
            if !distance.is_finite() || distance <= 0.0 {
                return Err(AppError::InvalidInput(
                    "max_distance must be a positive number of kilometres".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn filters(&self) -> CandidateFilters {
        CandidateFilters {
            gender: self.gender.clone().filter(|g| !g.trim().is_empty()),
            min_age: self.min_age,
            max_age: self.max_age,
            max_distance: self.max_distance,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Optional body of a signal-change notification
#[derive(Debug, Default, Deserialize)]
pub struct SignalChangedRequest {
    /// Song ids the ingestion path saw; unknown ones are fetched from the catalog
    #[serde(default)]
    pub song_ids: Vec<String>,
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Compatibility score of two users
pub async fn get_match_score(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path((user_a, user_b)): Path<(String, String)>,
) -> AppResult<Json<MatchScore>> {
    let score = state.scores.get_or_compute(&user_a, &user_b).await?;
    tracing::info!(
        request_id = %request_id,
        user_a = %user_a,
        user_b = %user_b,
        score = score.score,
        cached = score.cached,
        "Match score served"
    );
    Ok(Json(score))
}

/// Candidates for a user; query filters override stored preferences
pub async fn get_candidates(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<CandidateQuery>,
) -> AppResult<Json<Vec<Candidate>>> {
    query.validate()?;
    let limit = query
        .limit
        .unwrap_or(INTERACTIVE_CANDIDATE_LIMIT)
        .min(RECALCULATION_CANDIDATE_LIMIT);

    let candidates = state
        .candidates
        .find_for_user(&user_id, &query.filters(), limit)
        .await?;
    Ok(Json(candidates))
}

pub async fn get_song_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<SongRecommendations>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECOMMENDATION_LIMIT)
        .min(MAX_RECOMMENDATION_LIMIT);
    let recommendations = state.composer.recommend_songs(&user_id, limit).await?;
    Ok(Json(recommendations))
}

pub async fn get_user_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<UserRecommendations>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECOMMENDATION_LIMIT)
        .min(MAX_RECOMMENDATION_LIMIT);
    let recommendations = state.composer.recommend_users(&user_id, limit).await?;
    Ok(Json(recommendations))
}

/// Drops cached recommendation lists; they are rebuilt on the next read
pub async fn refresh_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<StatusCode> {
    state.composer.invalidate(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Hook for the listening-event ingestion path
pub async fn signal_changed(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    body: Option<Json<SignalChangedRequest>>,
) -> StatusCode {
    let song_ids = body.map(|Json(b)| b.song_ids).unwrap_or_default();
    if !song_ids.is_empty() {
        let ingestor = state.ingestor.clone();
        tokio::spawn(async move {
            for song_id in song_ids {
                if let Err(e) = ingestor.ensure_song_id_present(&song_id).await {
                    tracing::warn!(song_id = %song_id, error = %e, "Song ingestion failed");
                }
            }
        });
    }

    state.scheduler.notify_signal_changed(&user_id);
    tracing::debug!(request_id = %request_id, user_id = %user_id, "Signal change accepted");
    StatusCode::ACCEPTED
}

/// Pending-set size and expiry; `stuck` flags a drain that is not keeping up
pub async fn recalculation_status(
    State(state): State<AppState>,
) -> AppResult<Json<RecalculationStatus>> {
    let status = state.recalculator.status().await?;
    if status.stuck {
        tracing::warn!(
            pending = status.pending,
            ttl_seconds = ?status.ttl_seconds,
            "Recalculation set is close to expiry"
        );
    }
    Ok(Json(status))
}
