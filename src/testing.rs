//! In-memory stand-ins for the storage traits, used by unit tests.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{
    db::{CandidatePoolQuery, KvStore, MatchLedger, SignalStore},
    error::{AppError, AppResult},
    models::{
        CandidateProfile, DatingPreference, ListeningRecord, Location, MatchRecord, MatchStatus,
        PreferenceWeights, SongMetadata, UserPair, WeightedName,
    },
    services::geo::approx_sq_degrees,
};

#[derive(Default)]
struct SignalData {
    users: BTreeMap<String, CandidateProfile>,
    locations: HashMap<String, Location>,
    preferences: HashMap<String, DatingPreference>,
    songs: BTreeMap<String, SongMetadata>,
    history: BTreeMap<String, BTreeMap<String, ListeningRecord>>,
    weights: HashMap<String, PreferenceWeights>,
    onboarding: HashMap<String, Vec<String>>,
    failing_users: HashSet<String>,
    history_calls: HashMap<String, usize>,
    pool_limit: Option<usize>,
}

#[derive(Default)]
pub struct InMemorySignalStore {
    data: Mutex<SignalData>,
}

impl InMemorySignalStore {
    pub fn set_location(&self, user_id: &str, lat: f64, lon: f64) {
        let mut data = self.data.lock().unwrap();
        data.locations
            .insert(user_id.to_string(), Location::new(lat, lon));
    }

    /// Adds a visible, located user of the given age
    pub fn add_user(&self, user_id: &str, gender: &str, age: i32, lat: f64, lon: f64) {
        let today = Utc::now().date_naive();
        let birth = NaiveDate::from_ymd_opt(today.year() - age, 1, 1);
        let mut data = self.data.lock().unwrap();
        data.users.insert(
            user_id.to_string(),
            CandidateProfile {
                user_id: user_id.to_string(),
                gender: Some(gender.to_string()),
                birth_date: birth,
                is_visible: true,
                latitude: lat,
                longitude: lon,
            },
        );
        data.locations
            .insert(user_id.to_string(), Location::new(lat, lon));
    }

    pub fn set_preferences(&self, user_id: &str, prefs: DatingPreference) {
        let mut data = self.data.lock().unwrap();
        data.preferences.insert(user_id.to_string(), prefs);
    }

    pub fn add_song(&self, song_id: &str, artists: &str, genre: &str, year: i32) {
        let mut data = self.data.lock().unwrap();
        data.songs.insert(
            song_id.to_string(),
            SongMetadata {
                song_id: song_id.to_string(),
                title: Some(format!("Title {}", song_id)),
                artists: Some(artists.to_string()),
                genre: Some(genre.to_string()),
                release_year: Some(year),
                language: None,
            },
        );
    }

    pub fn add_play(&self, user_id: &str, song_id: &str, plays: i64, hour: u32) {
        let mut data = self.data.lock().unwrap();
        let record = ListeningRecord {
            song_id: song_id.to_string(),
            play_count: plays,
            last_played: Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap(),
        };
        data.history
            .entry(user_id.to_string())
            .or_default()
            .insert(song_id.to_string(), record);
    }

    pub fn set_weights(&self, user_id: &str, dimension: &str, weights: Vec<WeightedName>) {
        let mut data = self.data.lock().unwrap();
        let entry = data.weights.entry(user_id.to_string()).or_default();
        match dimension {
            "genre" => entry.genres = weights,
            "artist" => entry.artists = weights,
            _ => entry.languages = weights,
        }
    }

    pub fn set_onboarding_genres(&self, user_id: &str, genres: &[&str]) {
        let mut data = self.data.lock().unwrap();
        data.onboarding.insert(
            user_id.to_string(),
            genres.iter().map(|g| g.to_string()).collect(),
        );
    }

    /// Makes every history read for `user_id` fail
    pub fn fail_user(&self, user_id: &str) {
        self.data
            .lock()
            .unwrap()
            .failing_users
            .insert(user_id.to_string());
    }

    pub fn heal_user(&self, user_id: &str) {
        self.data.lock().unwrap().failing_users.remove(user_id);
    }

    /// Number of times the listening history of `user_id` was read
    pub fn history_calls(&self, user_id: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .history_calls
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Caps candidate pool rows below the query's own limit
    pub fn set_pool_limit(&self, limit: usize) {
        self.data.lock().unwrap().pool_limit = Some(limit);
    }

    pub fn has_song(&self, song_id: &str) -> bool {
        self.data.lock().unwrap().songs.contains_key(song_id)
    }

    fn listeners(data: &SignalData) -> BTreeMap<String, usize> {
        let mut listeners: BTreeMap<String, usize> = BTreeMap::new();
        for history in data.history.values() {
            for song_id in history.keys() {
                *listeners.entry(song_id.clone()).or_insert(0) += 1;
            }
        }
        listeners
    }
}

#[async_trait::async_trait]
impl SignalStore for InMemorySignalStore {
    async fn listening_history(&self, user_id: &str) -> AppResult<Vec<ListeningRecord>> {
        let mut data = self.data.lock().unwrap();
        *data.history_calls.entry(user_id.to_string()).or_insert(0) += 1;
        if data.failing_users.contains(user_id) {
            return Err(AppError::Internal(format!("history unavailable for {}", user_id)));
        }
        Ok(data
            .history
            .get(user_id)
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn listening_event_count(&self, user_id: &str) -> AppResult<i64> {
        let data = self.data.lock().unwrap();
        Ok(data
            .history
            .get(user_id)
            .map(|h| h.values().map(|r| r.play_count).sum())
            .unwrap_or(0))
    }

    async fn preference_weights(&self, user_id: &str) -> AppResult<PreferenceWeights> {
        let data = self.data.lock().unwrap();
        Ok(data.weights.get(user_id).cloned().unwrap_or_default())
    }

    async fn location(&self, user_id: &str) -> AppResult<Option<Location>> {
        Ok(self.data.lock().unwrap().locations.get(user_id).copied())
    }

    async fn dating_preferences(&self, user_id: &str) -> AppResult<Option<DatingPreference>> {
        Ok(self.data.lock().unwrap().preferences.get(user_id).cloned())
    }

    async fn song_metadata(&self, song_id: &str) -> AppResult<Option<SongMetadata>> {
        Ok(self.data.lock().unwrap().songs.get(song_id).cloned())
    }

    async fn songs_metadata(&self, song_ids: &[String]) -> AppResult<Vec<SongMetadata>> {
        let data = self.data.lock().unwrap();
        Ok(song_ids
            .iter()
            .filter_map(|id| data.songs.get(id).cloned())
            .collect())
    }

    async fn candidate_pool(
        &self,
        user_id: &str,
        query: &CandidatePoolQuery,
    ) -> AppResult<Vec<CandidateProfile>> {
        let data = self.data.lock().unwrap();
        let mut pool: Vec<CandidateProfile> = data
            .users
            .values()
            .filter(|u| u.user_id != user_id && u.is_visible)
            .filter(|u| query.bounds.contains(u.latitude, u.longitude))
            .filter(|u| match &query.preferred_gender {
                None => true,
                Some(wanted) => u
                    .gender
                    .as_deref()
                    .map(|g| g.trim().eq_ignore_ascii_case(wanted))
                    .unwrap_or(false),
            })
            .filter(|u| {
                u.birth_date
                    .map(|b| b >= query.earliest_birth && b <= query.latest_birth)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        let distance = |u: &CandidateProfile| {
            approx_sq_degrees(query.origin_lat, query.origin_lon, u.latitude, u.longitude)
        };
        pool.sort_by(|a, b| {
            distance(a)
                .partial_cmp(&distance(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        let cap = usize::try_from(query.limit).unwrap_or(0);
        pool.truncate(data.pool_limit.map_or(cap, |limit| limit.min(cap)));
        Ok(pool)
    }

    async fn onboarding_genres(&self, user_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .onboarding
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn songs_by_genre(&self, genre: &str, limit: usize) -> AppResult<Vec<SongMetadata>> {
        let data = self.data.lock().unwrap();
        let listeners = Self::listeners(&data);
        let mut songs: Vec<SongMetadata> = data
            .songs
            .values()
            .filter(|s| {
                s.genre
                    .as_deref()
                    .map(|g| g.eq_ignore_ascii_case(genre))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        songs.sort_by(|a, b| {
            let la = listeners.get(&a.song_id).copied().unwrap_or(0);
            let lb = listeners.get(&b.song_id).copied().unwrap_or(0);
            lb.cmp(&la).then_with(|| a.song_id.cmp(&b.song_id))
        });
        songs.truncate(limit);
        Ok(songs)
    }

    async fn songs_by_artists_or_genres(
        &self,
        artists: &[String],
        genres: &[String],
        limit: usize,
    ) -> AppResult<Vec<SongMetadata>> {
        let data = self.data.lock().unwrap();
        let credits = |s: &SongMetadata| {
            s.artist_names()
                .iter()
                .any(|a| artists.iter().any(|x| x == a))
        };
        let mut songs: Vec<SongMetadata> = data
            .songs
            .values()
            .filter(|s| {
                s.genre.as_ref().map(|g| genres.contains(g)).unwrap_or(false) || credits(s)
            })
            .cloned()
            .collect();
        // artist matches first, then id
        songs.sort_by(|a, b| {
            credits(b)
                .cmp(&credits(a))
                .then_with(|| a.song_id.cmp(&b.song_id))
        });
        songs.truncate(limit);
        Ok(songs)
    }

    async fn songs_heard_by(
        &self,
        user_ids: &[String],
        exclude: &[String],
        limit: usize,
    ) -> AppResult<Vec<String>> {
        let data = self.data.lock().unwrap();
        let mut plays: BTreeMap<String, i64> = BTreeMap::new();
        for user_id in user_ids {
            if let Some(history) = data.history.get(user_id) {
                for record in history.values() {
                    if !exclude.contains(&record.song_id) {
                        *plays.entry(record.song_id.clone()).or_insert(0) += record.play_count;
                    }
                }
            }
        }
        let mut ranked: Vec<(String, i64)> = plays.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(limit).map(|(id, _)| id).collect())
    }

    async fn popular_songs(&self, exclude: &[String], limit: usize) -> AppResult<Vec<String>> {
        let data = self.data.lock().unwrap();
        let mut ranked: Vec<(String, usize)> = Self::listeners(&data)
            .into_iter()
            .filter(|(id, _)| !exclude.contains(id))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(limit).map(|(id, _)| id).collect())
    }

    async fn random_songs(&self, exclude: &[String], limit: usize) -> AppResult<Vec<String>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .songs
            .keys()
            .filter(|id| !exclude.contains(id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_song(&self, song: &SongMetadata) -> AppResult<bool> {
        let mut data = self.data.lock().unwrap();
        if data.songs.contains_key(&song.song_id) {
            return Ok(false);
        }
        data.songs.insert(song.song_id.clone(), song.clone());
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    rows: Mutex<BTreeMap<(String, String), MatchRecord>>,
    upserts: AtomicUsize,
}

impl InMemoryLedger {
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, pair: &UserPair, status: MatchStatus) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&(pair.first().to_string(), pair.second().to_string())) {
            row.status = status;
        }
    }

    pub fn insert(&self, a: &str, b: &str, score: f64) {
        let pair = UserPair::new(a, b);
        let now = Utc::now();
        self.rows.lock().unwrap().insert(
            (pair.first().to_string(), pair.second().to_string()),
            MatchRecord {
                pair,
                score,
                status: MatchStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        );
    }
}

#[async_trait::async_trait]
impl MatchLedger for InMemoryLedger {
    async fn upsert_score(&self, pair: &UserPair, score: f64) -> AppResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        rows.entry((pair.first().to_string(), pair.second().to_string()))
            .and_modify(|row| {
                row.score = score;
                row.updated_at = now;
            })
            .or_insert_with(|| MatchRecord {
                pair: pair.clone(),
                score,
                status: MatchStatus::Pending,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn get(&self, pair: &UserPair) -> AppResult<Option<MatchRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(pair.first().to_string(), pair.second().to_string()))
            .cloned())
    }

    async fn top_matches(&self, user_id: &str, limit: usize) -> AppResult<Vec<(String, f64)>> {
        let rows = self.rows.lock().unwrap();
        let mut matches: Vec<(String, f64)> = rows
            .values()
            .filter(|r| r.pair.first() == user_id || r.pair.second() == user_id)
            .filter(|r| r.status != MatchStatus::Unmatched)
            .map(|r| (r.pair.other(user_id).to_string(), r.score))
            .collect();
        matches.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        matches.truncate(limit);
        Ok(matches)
    }
}

#[derive(Default)]
struct KvData {
    strings: HashMap<String, String>,
    sorted: HashMap<String, Vec<(f64, String)>>,
    ttls: HashMap<String, i64>,
}

/// Key-value store kept in process memory; TTLs are recorded, not enforced
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<KvData>,
    zrange_failures: AtomicUsize,
}

impl MemoryKvStore {
    pub fn ttl_of(&self, key: &str) -> Option<i64> {
        self.data.lock().unwrap().ttls.get(key).copied()
    }

    pub fn set_ttl(&self, key: &str, ttl: i64) {
        self.data.lock().unwrap().ttls.insert(key.to_string(), ttl);
    }

    pub fn members(&self, key: &str) -> Vec<String> {
        self.data
            .lock()
            .unwrap()
            .sorted
            .get(key)
            .map(|set| set.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Makes the next `n` sorted-set range reads fail
    pub fn fail_next_ranges(&self, n: usize) {
        self.zrange_failures.store(n, Ordering::SeqCst);
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.data.lock().unwrap().strings.contains_key(key)
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.data.lock().unwrap().strings.get(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        let mut data = self.data.lock().unwrap();
        data.strings.insert(key.to_string(), value.to_string());
        data.ttls.insert(key.to_string(), ttl_secs as i64);
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        let mut data = self.data.lock().unwrap();
        data.strings.remove(key);
        data.sorted.remove(key);
        data.ttls.remove(key);
        Ok(())
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> AppResult<bool> {
        let mut data = self.data.lock().unwrap();
        let set = data.sorted.entry(key.to_string()).or_default();
        if set.iter().any(|(_, m)| m == member) {
            return Ok(false);
        }
        set.push((score, member.to_string()));
        set.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        Ok(true)
    }

    async fn zrange_all(&self, key: &str) -> AppResult<Vec<String>> {
        let remaining = self.zrange_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.zrange_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Internal("store unreachable".to_string()));
        }
        Ok(self.members(key))
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<()> {
        let mut data = self.data.lock().unwrap();
        let now_empty = match data.sorted.get_mut(key) {
            Some(set) => {
                set.retain(|(_, m)| m != member);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            data.sorted.remove(key);
            data.ttls.remove(key);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .sorted
            .get(key)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> AppResult<()> {
        let mut data = self.data.lock().unwrap();
        if data.strings.contains_key(key) || data.sorted.contains_key(key) {
            data.ttls.insert(key.to_string(), ttl_secs as i64);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<i64>> {
        let data = self.data.lock().unwrap();
        if data.strings.contains_key(key) || data.sorted.contains_key(key) {
            Ok(Some(data.ttls.get(key).copied().unwrap_or(-1)))
        } else {
            Ok(None)
        }
    }
}

/// Store whose every operation fails, as if the server were unreachable
pub struct FailingKvStore;

fn unreachable_store<T>() -> AppResult<T> {
    Err(AppError::Internal("store unreachable".to_string()))
}

#[async_trait::async_trait]
impl KvStore for FailingKvStore {
    async fn get(&self, _key: &str) -> AppResult<Option<String>> {
        unreachable_store()
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> AppResult<()> {
        unreachable_store()
    }

    async fn del(&self, _key: &str) -> AppResult<()> {
        unreachable_store()
    }

    async fn zadd_nx(&self, _key: &str, _member: &str, _score: f64) -> AppResult<bool> {
        unreachable_store()
    }

    async fn zrange_all(&self, _key: &str) -> AppResult<Vec<String>> {
        unreachable_store()
    }

    async fn zrem(&self, _key: &str, _member: &str) -> AppResult<()> {
        unreachable_store()
    }

    async fn zcard(&self, _key: &str) -> AppResult<u64> {
        unreachable_store()
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> AppResult<()> {
        unreachable_store()
    }

    async fn ttl(&self, _key: &str) -> AppResult<Option<i64>> {
        unreachable_store()
    }
}

/// Sorted, de-duplicated ids, for order-insensitive assertions
pub fn id_set<'a>(ids: impl IntoIterator<Item = &'a str>) -> BTreeSet<&'a str> {
    ids.into_iter().collect()
}
