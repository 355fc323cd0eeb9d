//! Durable match score ledger, one row per canonical user pair.

use crate::{
    db::postgres::SlowQueryMonitor,
    error::{AppError, AppResult},
    models::{MatchRecord, MatchStatus, UserPair},
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[async_trait::async_trait]
pub trait MatchLedger: Send + Sync {
    /// Inserts or updates the score for a pair
    ///
    /// A new row starts as `pending`; an existing row keeps its status.
    async fn upsert_score(&self, pair: &UserPair, score: f64) -> AppResult<()>;

    async fn get(&self, pair: &UserPair) -> AppResult<Option<MatchRecord>>;

    /// Highest-scoring counterparts of `user_id`, best first
    async fn top_matches(&self, user_id: &str, limit: usize) -> AppResult<Vec<(String, f64)>>;
}

const SQL_UPSERT_SCORE: &str = r#"
INSERT INTO matches (user_id_1, user_id_2, score, status)
VALUES ($1, $2, $3, 'pending')
ON CONFLICT (user_id_1, user_id_2)
DO UPDATE SET score = EXCLUDED.score, updated_at = NOW()
"#;

const SQL_GET_MATCH: &str = r#"
SELECT user_id_1, user_id_2, score, status, created_at, updated_at
FROM matches
WHERE user_id_1 = $1 AND user_id_2 = $2
"#;

const SQL_TOP_MATCHES: &str = r#"
SELECT
    CASE WHEN user_id_1 = $1 THEN user_id_2 ELSE user_id_1 END AS other_id,
    score
FROM matches
WHERE (user_id_1 = $1 OR user_id_2 = $1) AND status <> 'unmatched'
ORDER BY score DESC, other_id
LIMIT $2
"#;

#[derive(sqlx::FromRow)]
struct MatchRow {
    user_id_1: String,
    user_id_2: String,
    score: f64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MatchRow> for MatchRecord {
    type Error = AppError;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<MatchStatus>().map_err(AppError::Internal)?;
        Ok(MatchRecord {
            pair: UserPair::new(&row.user_id_1, &row.user_id_2),
            score: row.score,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgMatchLedger {
    pool: PgPool,
    monitor: SlowQueryMonitor,
}

impl PgMatchLedger {
    pub fn new(pool: PgPool, monitor: SlowQueryMonitor) -> Self {
        Self { pool, monitor }
    }
}

#[async_trait::async_trait]
impl MatchLedger for PgMatchLedger {
    async fn upsert_score(&self, pair: &UserPair, score: f64) -> AppResult<()> {
        self.monitor
            .observe(
                "upsert_match_score",
                sqlx::query(SQL_UPSERT_SCORE)
                    .bind(pair.first())
                    .bind(pair.second())
                    .bind(score)
                    .execute(&self.pool),
            )
            .await?;

        tracing::debug!(pair = %pair, score, "Match score persisted");
        Ok(())
    }

    async fn get(&self, pair: &UserPair) -> AppResult<Option<MatchRecord>> {
        let row = self
            .monitor
            .observe(
                "get_match",
                sqlx::query_as::<_, MatchRow>(SQL_GET_MATCH)
                    .bind(pair.first())
                    .bind(pair.second())
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.map(MatchRecord::try_from).transpose()
    }

    async fn top_matches(&self, user_id: &str, limit: usize) -> AppResult<Vec<(String, f64)>> {
        let rows = self
            .monitor
            .observe(
                "top_matches",
                sqlx::query_as::<_, (String, f64)>(SQL_TOP_MATCHES)
                    .bind(user_id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows)
    }
}
