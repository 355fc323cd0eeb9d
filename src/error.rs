use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Location missing for user {0}: set a location before requesting candidates or scores")]
    LocationMissing(String),

    #[error("Scoring {user_id} against {candidate_id} failed: {reason}")]
    CandidateScoringFailed {
        user_id: String,
        candidate_id: String,
        reason: String,
    },

    #[error("Catalog unavailable: {0}")]
    UpstreamCatalogUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::LocationMissing(_) => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Internal(_)
            | AppError::CandidateScoringFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamCatalogUnavailable(_) | AppError::HttpClient(_) => {
                StatusCode::BAD_GATEWAY
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
