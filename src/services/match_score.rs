//! Pair scores served from the score cache, computed and persisted on a miss.

use crate::{
    db::{Cache, CacheKey},
    error::AppResult,
    models::{MatchScore, UserPair},
    services::similarity::SimilarityScorer,
};

/// Lifetime of a cached pair score
pub const SCORE_CACHE_TTL: u64 = 86_400; // 24 hours

/// Get-or-compute access to pair scores: cache first, then the scorer,
/// whose ledger upsert is the source of truth
#[derive(Clone)]
pub struct MatchScoreService {
    scorer: SimilarityScorer,
    cache: Cache,
}

impl MatchScoreService {
    pub fn new(scorer: SimilarityScorer, cache: Cache) -> Self {
        Self { scorer, cache }
    }

    pub async fn get_or_compute(&self, user_a: &str, user_b: &str) -> AppResult<MatchScore> {
        let key = CacheKey::MatchScore(UserPair::new(user_a, user_b));

        if let Some(score) = self.cache.get_from_cache::<f64>(&key).await? {
            tracing::debug!(key = %key, score, "Score cache hit");
            return Ok(MatchScore {
                score,
                cached: true,
            });
        }

        tracing::debug!(key = %key, "Score cache miss");
        let score = self.compute_and_cache(user_a, user_b, &key).await?;
        Ok(MatchScore {
            score,
            cached: false,
        })
    }

    /// Recomputes a pair score regardless of the cache and refreshes the entry
    pub async fn recompute(&self, user_a: &str, user_b: &str) -> AppResult<f64> {
        let key = CacheKey::MatchScore(UserPair::new(user_a, user_b));
        self.compute_and_cache(user_a, user_b, &key).await
    }

    async fn compute_and_cache(&self, user_a: &str, user_b: &str, key: &CacheKey) -> AppResult<f64> {
        let score = self.scorer.score(user_a, user_b).await?;
        self.cache.set(key, &score, SCORE_CACHE_TTL).await;
        Ok(score)
    }
}
