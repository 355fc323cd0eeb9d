//! Song and user recommendation lists with layered fallbacks
//!
//! Every source below the request boundary is best-effort: a failing source
//! contributes nothing and the next tier fills the gap. Only a missing
//! location is reported to the caller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::{
    config::EngineSettings,
    db::{Cache, CacheKey, MatchLedger, SignalStore},
    error::AppResult,
    models::{
        Candidate, PreferenceDimension, RecommendationType, SongMetadata, SongRecommendation,
        SongRecommendations, UserRecommendation, UserRecommendations,
    },
    services::{
        candidates::{CandidateFilter, INTERACTIVE_CANDIDATE_LIMIT},
        catalog::{CatalogProvider, SongIngestor},
        match_score::MatchScoreService,
    },
};

/// Users with fewer listening events than this get onboarding-based songs
pub const NEW_USER_EVENT_THRESHOLD: i64 = 5;

pub const NEW_USER_SONGS_TTL: u64 = 3600; // 1 hour
pub const ESTABLISHED_SONGS_TTL: u64 = 10800; // 3 hours
pub const USER_RECOMMENDATIONS_TTL: u64 = 1800; // 30 minutes

pub const MAX_RECOMMENDATION_LIMIT: usize = 100;

const TOP_PREFERENCES: usize = 5;
const COLLABORATIVE_NEIGHBOURS: usize = 10;
const DISTANCE_WEIGHT: f64 = 0.2;
const SIMILARITY_WEIGHT: f64 = 0.8;

/// Cached list together with the limit it was composed for
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedList<T> {
    limit: usize,
    items: Vec<T>,
}

/// Ordered, de-duplicated song list under construction
struct SongPicker {
    limit: usize,
    seen: HashSet<String>,
    picked: Vec<SongRecommendation>,
}

impl SongPicker {
    fn new(limit: usize, heard: &HashSet<String>) -> Self {
        Self {
            limit,
            seen: heard.clone(),
            picked: Vec::new(),
        }
    }

    fn push(&mut self, song_id: &str, kind: RecommendationType) -> bool {
        if self.is_full() || !self.seen.insert(song_id.to_string()) {
            return false;
        }
        self.picked.push(SongRecommendation::new(song_id, kind));
        true
    }

    /// Pushes until `cap` songs of this call were accepted or the list is full
    fn extend<'a>(
        &mut self,
        song_ids: impl IntoIterator<Item = &'a str>,
        kind: RecommendationType,
        cap: usize,
    ) -> usize {
        let mut added = 0;
        for song_id in song_ids {
            if added >= cap || self.is_full() {
                break;
            }
            if self.push(song_id, kind) {
                added += 1;
            }
        }
        added
    }

    fn len(&self) -> usize {
        self.picked.len()
    }

    fn is_empty(&self) -> bool {
        self.picked.is_empty()
    }

    fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.picked.len())
    }

    fn is_full(&self) -> bool {
        self.picked.len() >= self.limit
    }

    /// Every id that must not be suggested again: heard songs and picks
    fn excluded(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.seen.iter().cloned().collect();
        ids.sort();
        ids
    }

    fn finish(self) -> Vec<SongRecommendation> {
        self.picked
    }
}

/// Interleaves per-genre lists one song at a time, keeping per-list order
pub fn round_robin(lists: &[Vec<String>], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    let longest = lists.iter().map(Vec::len).max().unwrap_or(0);

    for position in 0..longest {
        for list in lists {
            if merged.len() >= limit {
                return merged;
            }
            if let Some(song_id) = list.get(position) {
                if seen.insert(song_id.clone()) {
                    merged.push(song_id.clone());
                }
            }
        }
    }
    merged
}

/// Ranking score for user discovery: similarity blended with proximity
pub fn adjusted_score(similarity: f64, distance_km: f64, max_distance_km: f64) -> f64 {
    let proximity = if max_distance_km > 0.0 {
        (1.0 - distance_km / max_distance_km).max(0.0)
    } else {
        0.0
    };
    SIMILARITY_WEIGHT * similarity + DISTANCE_WEIGHT * 100.0 * proximity
}

/// How strongly a song overlaps a user's heaviest artists and genres
fn content_overlap(
    song: &SongMetadata,
    artist_weights: &BTreeMap<String, f64>,
    genre_weights: &BTreeMap<String, f64>,
) -> f64 {
    let artists: f64 = song
        .artist_names()
        .iter()
        .filter_map(|name| artist_weights.get(*name))
        .sum();
    let genre = song
        .genre_name()
        .and_then(|g| genre_weights.get(g))
        .copied()
        .unwrap_or(0.0);
    artists + genre
}

fn or_degraded<T: Default>(source: &str, user_id: &str, result: AppResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                source,
                error = %e,
                "Recommendation source failed, falling back"
            );
            T::default()
        }
    }
}

pub struct RecommendationComposer {
    store: Arc<dyn SignalStore>,
    ledger: Arc<dyn MatchLedger>,
    catalog: Arc<dyn CatalogProvider>,
    ingestor: SongIngestor,
    candidates: CandidateFilter,
    scores: Arc<MatchScoreService>,
    cache: Cache,
    settings: EngineSettings,
}

impl RecommendationComposer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SignalStore>,
        ledger: Arc<dyn MatchLedger>,
        catalog: Arc<dyn CatalogProvider>,
        ingestor: SongIngestor,
        candidates: CandidateFilter,
        scores: Arc<MatchScoreService>,
        cache: Cache,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            catalog,
            ingestor,
            candidates,
            scores,
            cache,
            settings,
        }
    }

    /// Ranked song suggestions, tagged with the source that produced each
    pub async fn recommend_songs(&self, user_id: &str, limit: usize) -> AppResult<SongRecommendations> {
        let limit = limit.min(MAX_RECOMMENDATION_LIMIT);
        if limit == 0 {
            return Ok(SongRecommendations::default());
        }

        let key = CacheKey::SongRecommendations(user_id.to_string());
        if let Some(cached) = self
            .cache
            .get_from_cache::<CachedList<SongRecommendation>>(&key)
            .await?
        {
            if cached.limit >= limit {
                tracing::debug!(user_id = %user_id, "Song recommendations served from cache");
                let mut recommendations = cached.items;
                recommendations.truncate(limit);
                return Ok(SongRecommendations { recommendations });
            }
        }

        let events = or_degraded(
            "listening_event_count",
            user_id,
            self.store.listening_event_count(user_id).await,
        );
        let is_new = events < NEW_USER_EVENT_THRESHOLD;

        let recommendations = if is_new {
            self.new_user_songs(user_id, limit).await
        } else {
            self.established_user_songs(user_id, limit).await
        };

        tracing::info!(
            user_id = %user_id,
            events,
            is_new,
            count = recommendations.len(),
            "Composed song recommendations"
        );

        let ttl = if is_new {
            NEW_USER_SONGS_TTL
        } else {
            ESTABLISHED_SONGS_TTL
        };
        let entry = CachedList {
            limit,
            items: recommendations,
        };
        self.cache.set(&key, &entry, ttl).await;

        Ok(SongRecommendations {
            recommendations: entry.items,
        })
    }

    /// Onboarding genres round-robin, then popular, then random
    async fn new_user_songs(&self, user_id: &str, limit: usize) -> Vec<SongRecommendation> {
        let genres = or_degraded(
            "onboarding_genres",
            user_id,
            self.store.onboarding_genres(user_id).await,
        );

        let mut per_genre: Vec<Vec<String>> = Vec::with_capacity(genres.len());
        for genre in &genres {
            let songs = or_degraded(
                "songs_by_genre",
                user_id,
                self.store.songs_by_genre(genre, limit).await,
            );
            per_genre.push(songs.into_iter().map(|s| s.song_id).collect());
        }

        let half = limit / 2;
        let mut genre_songs = round_robin(&per_genre, limit);

        if genre_songs.len() < half && !genres.is_empty() {
            for (genre, list) in genres.iter().zip(per_genre.iter_mut()) {
                let songs = or_degraded(
                    "catalog_songs_by_genre",
                    user_id,
                    self.catalog.songs_by_genre(genre, limit).await,
                );
                self.ingestor.ensure_songs_present(&songs).await;
                list.extend(songs.into_iter().map(|s| s.song_id));
            }
            genre_songs = round_robin(&per_genre, limit);
        }

        let mut picker = SongPicker::new(limit, &HashSet::new());
        picker.extend(
            genre_songs.iter().map(String::as_str),
            RecommendationType::GenreBased,
            limit,
        );

        if picker.len() < half {
            self.pad_with_popular(user_id, &mut picker).await;
        }
        if picker.is_empty() {
            self.pad_with_random(user_id, &mut picker).await;
        }

        picker.finish()
    }

    /// Content-based and collaborative halves, padded with popular songs
    async fn established_user_songs(&self, user_id: &str, limit: usize) -> Vec<SongRecommendation> {
        let half = limit / 2;

        let history = or_degraded(
            "listening_history",
            user_id,
            self.store.listening_history(user_id).await,
        );
        let heard: HashSet<String> = history.into_iter().map(|r| r.song_id).collect();
        let mut picker = SongPicker::new(limit, &heard);

        let content = self.content_based(user_id, &heard, half).await;
        picker.extend(
            content.iter().map(String::as_str),
            RecommendationType::ContentBased,
            half,
        );

        let collaborative = self.collaborative(user_id, &picker.excluded(), half).await;
        picker.extend(
            collaborative.iter().map(String::as_str),
            RecommendationType::Collaborative,
            half,
        );

        self.pad_with_popular(user_id, &mut picker).await;
        if picker.is_empty() {
            self.pad_with_random(user_id, &mut picker).await;
        }

        picker.finish()
    }

    /// Unheard songs ranked by overlap with the user's top artists and genres
    async fn content_based(&self, user_id: &str, heard: &HashSet<String>, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }

        let weights = or_degraded(
            "preference_weights",
            user_id,
            self.store.preference_weights(user_id).await,
        );
        let top_artists = weights.top(PreferenceDimension::Artist, TOP_PREFERENCES);
        let top_genres = weights.top(PreferenceDimension::Genre, TOP_PREFERENCES);
        if top_artists.is_empty() && top_genres.is_empty() {
            return Vec::new();
        }

        let artist_weights: BTreeMap<String, f64> = weights
            .artists
            .iter()
            .filter(|w| top_artists.contains(&w.name))
            .map(|w| (w.name.clone(), w.weight))
            .collect();
        let genre_weights: BTreeMap<String, f64> = weights
            .genres
            .iter()
            .filter(|w| top_genres.contains(&w.name))
            .map(|w| (w.name.clone(), w.weight))
            .collect();

        let fetch = limit * 3 + heard.len();
        let mut songs: Vec<SongMetadata> = or_degraded(
            "songs_by_artists_or_genres",
            user_id,
            self.store
                .songs_by_artists_or_genres(&top_artists, &top_genres, fetch)
                .await,
        )
        .into_iter()
        .filter(|s| !heard.contains(&s.song_id))
        .collect();

        if songs.len() < limit {
            if let Some(genre) = top_genres.first() {
                let extra = or_degraded(
                    "catalog_songs_by_genre",
                    user_id,
                    self.catalog.songs_by_genre(genre, limit).await,
                );
                self.ingestor.ensure_songs_present(&extra).await;
                songs.extend(extra.into_iter().filter(|s| !heard.contains(&s.song_id)));
            }
        }

        if songs.len() < limit {
            if let Some(artist) = top_artists.first() {
                let extra = or_degraded(
                    "catalog_search_songs",
                    user_id,
                    self.catalog.search_songs(artist, limit).await,
                );
                self.ingestor.ensure_songs_present(&extra).await;
                songs.extend(extra.into_iter().filter(|s| !heard.contains(&s.song_id)));
            }
        }

        let mut scored: Vec<(f64, String)> = songs
            .iter()
            .map(|s| (content_overlap(s, &artist_weights, &genre_weights), s.song_id.clone()))
            .filter(|(overlap, _)| *overlap > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        scored.dedup_by(|a, b| a.1 == b.1);
        scored.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    /// Songs heard by the user's most similar matches but not by the user
    async fn collaborative(&self, user_id: &str, exclude: &[String], limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }

        let neighbours: Vec<String> = or_degraded(
            "top_matches",
            user_id,
            self.ledger.top_matches(user_id, COLLABORATIVE_NEIGHBOURS).await,
        )
        .into_iter()
        .filter(|(_, score)| *score > 0.0)
        .map(|(id, _)| id)
        .collect();

        if neighbours.is_empty() {
            return Vec::new();
        }

        or_degraded(
            "songs_heard_by",
            user_id,
            self.store.songs_heard_by(&neighbours, exclude, limit).await,
        )
    }

    /// Fills the rest of the list with locally popular songs, or catalog
    /// trending songs when nothing local is available
    async fn pad_with_popular(&self, user_id: &str, picker: &mut SongPicker) {
        if picker.is_full() {
            return;
        }

        let popular = or_degraded(
            "popular_songs",
            user_id,
            self.store
                .popular_songs(&picker.excluded(), picker.remaining())
                .await,
        );
        let added = picker.extend(
            popular.iter().map(String::as_str),
            RecommendationType::Popular,
            usize::MAX,
        );

        if added == 0 && !picker.is_full() {
            let trending = or_degraded(
                "catalog_trending",
                user_id,
                self.catalog.trending(picker.remaining()).await,
            );
            self.ingestor.ensure_songs_present(&trending).await;
            picker.extend(
                trending.iter().map(|s| s.song_id.as_str()),
                RecommendationType::Popular,
                usize::MAX,
            );
        }
    }

    async fn pad_with_random(&self, user_id: &str, picker: &mut SongPicker) {
        let random = or_degraded(
            "random_songs",
            user_id,
            self.store
                .random_songs(&picker.excluded(), picker.remaining())
                .await,
        );
        picker.extend(
            random.iter().map(String::as_str),
            RecommendationType::Random,
            usize::MAX,
        );
    }

    /// Nearby users above the score threshold, best adjusted score first
    pub async fn recommend_users(&self, user_id: &str, limit: usize) -> AppResult<UserRecommendations> {
        let limit = limit.min(MAX_RECOMMENDATION_LIMIT);
        if limit == 0 {
            return Ok(UserRecommendations::default());
        }

        let key = CacheKey::UserRecommendations(user_id.to_string());
        if let Some(cached) = self
            .cache
            .get_from_cache::<CachedList<UserRecommendation>>(&key)
            .await?
        {
            if cached.limit >= limit {
                tracing::debug!(user_id = %user_id, "User recommendations served from cache");
                let mut recommendations = cached.items;
                recommendations.truncate(limit);
                return Ok(UserRecommendations { recommendations });
            }
        }

        let location = self.candidates.require_location(user_id).await?;
        let mut preferences = or_degraded(
            "dating_preferences",
            user_id,
            self.candidates.effective_preferences(user_id).await,
        );
        preferences.max_distance = preferences
            .max_distance
            .min(self.settings.discovery_max_distance_km);
        let max_distance = preferences.max_distance;

        let pool_limit = INTERACTIVE_CANDIDATE_LIMIT.max(limit);
        let candidates = or_degraded(
            "candidates",
            user_id,
            self.candidates
                .find_candidates(user_id, &location, &preferences, pool_limit)
                .await,
        );

        let scored = self.score_candidates(user_id, candidates).await;
        let min_score = self.settings.min_recommendation_score;

        let mut ranked: Vec<(f64, UserRecommendation)> = scored
            .into_iter()
            .filter(|rec| rec.score >= min_score)
            .map(|rec| (adjusted_score(rec.score, rec.distance_km, max_distance), rec))
            .collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.user_id.cmp(&b.1.user_id))
        });
        let recommendations: Vec<UserRecommendation> =
            ranked.into_iter().take(limit).map(|(_, rec)| rec).collect();

        tracing::info!(
            user_id = %user_id,
            max_distance,
            count = recommendations.len(),
            "Composed user recommendations"
        );

        let entry = CachedList {
            limit,
            items: recommendations,
        };
        self.cache.set(&key, &entry, USER_RECOMMENDATIONS_TTL).await;

        Ok(UserRecommendations {
            recommendations: entry.items,
        })
    }

    async fn score_candidates(&self, user_id: &str, candidates: Vec<Candidate>) -> Vec<UserRecommendation> {
        let mut tasks = JoinSet::new();
        for candidate in candidates {
            let scores = self.scores.clone();
            let user_id = user_id.to_string();
            tasks.spawn(async move {
                let result = scores.get_or_compute(&user_id, &candidate.user_id).await;
                (candidate, result)
            });
        }

        let mut scored = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((candidate, Ok(score))) => scored.push(UserRecommendation {
                    user_id: candidate.user_id,
                    score: score.score,
                    distance_km: candidate.distance_km,
                }),
                Ok((candidate, Err(e))) => {
                    tracing::warn!(
                        user_id = %user_id,
                        candidate_id = %candidate.user_id,
                        error = %e,
                        "Candidate scoring failed, skipping"
                    );
                }
                Err(e) => tracing::error!(error = %e, "Candidate scoring task join error"),
            }
        }
        scored
    }

    /// Drops both cached lists; the next read recomposes them
    pub async fn invalidate(&self, user_id: &str) -> AppResult<()> {
        self.cache
            .invalidate(&CacheKey::SongRecommendations(user_id.to_string()))
            .await?;
        self.cache
            .invalidate(&CacheKey::UserRecommendations(user_id.to_string()))
            .await?;
        tracing::info!(user_id = %user_id, "Recommendation caches invalidated");
        Ok(())
    }
}
