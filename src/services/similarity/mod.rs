//! Compatibility scoring between two users.

pub mod components;

pub use components::{Component, ComponentScore, ScoreBreakdown, UserSignals};

use std::sync::Arc;

use crate::{
    db::{MatchLedger, SignalStore},
    error::{AppError, AppResult},
    models::UserPair,
};

/// Computes and persists the compatibility score of a user pair
#[derive(Clone)]
pub struct SimilarityScorer {
    store: Arc<dyn SignalStore>,
    ledger: Arc<dyn MatchLedger>,
}

impl SimilarityScorer {
    pub fn new(store: Arc<dyn SignalStore>, ledger: Arc<dyn MatchLedger>) -> Self {
        Self { store, ledger }
    }

    /// Per-component breakdown for a pair, always evaluated in canonical order
    pub async fn breakdown(&self, pair: &UserPair) -> AppResult<ScoreBreakdown> {
        let (first, second) = tokio::try_join!(
            self.load_signals(pair.first()),
            self.load_signals(pair.second())
        )?;
        Ok(ScoreBreakdown::compute(&first, &second))
    }

    /// Scores `user_a` against `user_b` and upserts the ledger row
    ///
    /// The result is in [0, 100] and does not depend on argument order.
    pub async fn score(&self, user_a: &str, user_b: &str) -> AppResult<f64> {
        if user_a == user_b {
            return Err(AppError::InvalidInput(
                "Cannot score a user against themselves".to_string(),
            ));
        }

        let pair = UserPair::new(user_a, user_b);
        let breakdown = self.breakdown(&pair).await?;
        let score = breakdown.final_score();

        tracing::debug!(
            pair = %pair,
            score,
            evaluated_weight = breakdown.evaluated_weight(),
            components = ?breakdown
                .components
                .iter()
                .map(|c| (c.component.name(), c.similarity))
                .collect::<Vec<_>>(),
            "Computed compatibility score"
        );

        self.ledger.upsert_score(&pair, score).await?;

        Ok(score)
    }

    async fn load_signals(&self, user_id: &str) -> AppResult<UserSignals> {
        let (history, weights) = tokio::try_join!(
            self.store.listening_history(user_id),
            self.store.preference_weights(user_id)
        )?;

        let song_ids: Vec<String> = history.iter().map(|r| r.song_id.clone()).collect();
        let songs = self
            .store
            .songs_metadata(&song_ids)
            .await?
            .into_iter()
            .map(|song| (song.song_id.clone(), song))
            .collect();

        Ok(UserSignals {
            history,
            songs,
            genre_weights: weights.genres,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchStatus, WeightedName};
    use crate::testing::{InMemoryLedger, InMemorySignalStore};

    fn scorer_with(store: InMemorySignalStore) -> (SimilarityScorer, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::default());
        (
            SimilarityScorer::new(Arc::new(store), ledger.clone()),
            ledger,
        )
    }

    fn populated_store() -> InMemorySignalStore {
        let store = InMemorySignalStore::default();
        store.add_song("s1", "Radiohead", "rock", 1997);
        store.add_song("s2", "Portishead, Beth Gibbons", "trip-hop", 1994);
        store.add_song("s3", "Massive Attack", "trip-hop", 1998);
        store.add_play("alice", "s1", 3, 22);
        store.add_play("alice", "s2", 1, 23);
        store.add_play("bob", "s1", 2, 21);
        store.add_play("bob", "s3", 5, 9);
        store.set_weights("alice", "genre", vec![WeightedName::new("rock", 5.0)]);
        store.set_weights(
            "bob",
            "genre",
            vec![WeightedName::new("rock", 2.0), WeightedName::new("trip-hop", 4.0)],
        );
        store
    }

    #[tokio::test]
    async fn test_score_is_symmetric() {
        let (scorer, _) = scorer_with(populated_store());
        let ab = scorer.score("alice", "bob").await.unwrap();
        let ba = scorer.score("bob", "alice").await.unwrap();
        assert_eq!(ab, ba);
        assert!(ab > 0.0 && ab <= 100.0);
    }

    #[tokio::test]
    async fn test_score_writes_one_ledger_row_per_pair() {
        let (scorer, ledger) = scorer_with(populated_store());
        scorer.score("alice", "bob").await.unwrap();
        scorer.score("bob", "alice").await.unwrap();

        assert_eq!(ledger.row_count(), 1);
        let record = ledger.get(&UserPair::new("bob", "alice")).await.unwrap().unwrap();
        assert_eq!(record.pair.first(), "alice");
        assert_eq!(record.status, MatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_rescoring_keeps_existing_status() {
        let (scorer, ledger) = scorer_with(populated_store());
        scorer.score("alice", "bob").await.unwrap();
        ledger.set_status(&UserPair::new("alice", "bob"), MatchStatus::Matched);

        scorer.score("alice", "bob").await.unwrap();
        let record = ledger.get(&UserPair::new("alice", "bob")).await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Matched);
    }

    #[tokio::test]
    async fn test_user_without_history_scores_zero_not_error() {
        let (scorer, _) = scorer_with(populated_store());
        let score = scorer.score("alice", "newcomer").await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn test_self_score_rejected() {
        let (scorer, _) = scorer_with(populated_store());
        let err = scorer.score("alice", "alice").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_breakdown_shared_songs_component() {
        let (scorer, _) = scorer_with(populated_store());
        let breakdown = scorer
            .breakdown(&UserPair::new("alice", "bob"))
            .await
            .unwrap();
        let shared = breakdown.get(Component::SharedSongs).unwrap();
        assert!((shared.sub_score() - 35.0 / 3.0).abs() < 1e-9);
    }
}
