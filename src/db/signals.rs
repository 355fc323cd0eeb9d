//! Read access to the listening signals that drive scoring and recommendations.

use crate::{
    db::postgres::SlowQueryMonitor,
    error::AppResult,
    models::{
        CandidateProfile, DatingPreference, ListeningRecord, Location, PreferenceWeights,
        SongMetadata, WeightedName,
    },
    services::geo::BoundingBox,
};
use chrono::{Days, Months, NaiveDate};
use sqlx::PgPool;

/// Upper bound on rows returned by the coarse candidate pool query
pub const CANDIDATE_POOL_LIMIT: i64 = 1000;

/// Coarse candidate query around an origin
///
/// Carries the cheap predicates (box, gender, birth date window) so the row
/// cap only ever drops ineligible or far rows. Rows come back nearest first
/// by [`approx_sq_degrees`](crate::services::geo::approx_sq_degrees).
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePoolQuery {
    pub bounds: BoundingBox,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub preferred_gender: Option<String>,
    pub earliest_birth: NaiveDate,
    pub latest_birth: NaiveDate,
    pub limit: i64,
}

impl CandidatePoolQuery {
    pub fn new(origin: &Location, preferences: &DatingPreference, today: NaiveDate) -> Self {
        // one day of slack each side; the exact age check runs afterwards
        let (floor, ceiling) = birth_date_limits();
        let earliest_birth = years_before(today, preferences.max_age.saturating_add(1))
            .and_then(|d| d.checked_sub_days(Days::new(1)))
            .map_or(floor, |d| d.clamp(floor, ceiling));
        let latest_birth = years_before(today, preferences.min_age)
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map_or(ceiling, |d| d.clamp(floor, ceiling));

        Self {
            bounds: BoundingBox::around(
                origin.latitude,
                origin.longitude,
                preferences.max_distance,
            ),
            origin_lat: origin.latitude,
            origin_lon: origin.longitude,
            preferred_gender: preferences
                .preferred_gender
                .as_deref()
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            earliest_birth,
            latest_birth,
            limit: CANDIDATE_POOL_LIMIT,
        }
    }
}

/// Dates Postgres can store and chrono can build
fn birth_date_limits() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN),
        NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX),
    )
}

fn years_before(date: NaiveDate, years: i32) -> Option<NaiveDate> {
    let months = u32::try_from(years.max(0)).ok()?.checked_mul(12)?;
    date.checked_sub_months(Months::new(months))
}

/// Signal store contract consumed by the scoring core
///
/// Implementations return empty collections (not errors) for users without data.
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    async fn listening_history(&self, user_id: &str) -> AppResult<Vec<ListeningRecord>>;

    /// Total number of listening events (sum of play counts)
    async fn listening_event_count(&self, user_id: &str) -> AppResult<i64>;

    async fn preference_weights(&self, user_id: &str) -> AppResult<PreferenceWeights>;

    async fn location(&self, user_id: &str) -> AppResult<Option<Location>>;

    async fn dating_preferences(&self, user_id: &str) -> AppResult<Option<DatingPreference>>;

    async fn song_metadata(&self, song_id: &str) -> AppResult<Option<SongMetadata>>;

    /// Metadata for many songs at once; unknown ids are omitted
    async fn songs_metadata(&self, song_ids: &[String]) -> AppResult<Vec<SongMetadata>>;

    /// Visible located users other than `user_id` matching `query`, nearest
    /// first and capped at `query.limit`. Exact distance and age are checked
    /// by the caller.
    async fn candidate_pool(
        &self,
        user_id: &str,
        query: &CandidatePoolQuery,
    ) -> AppResult<Vec<CandidateProfile>>;

    /// Genres the user picked during onboarding, heaviest first
    async fn onboarding_genres(&self, user_id: &str) -> AppResult<Vec<String>>;

    /// Songs of a genre ordered by listener count
    async fn songs_by_genre(&self, genre: &str, limit: usize) -> AppResult<Vec<SongMetadata>>;

    /// Songs crediting any of `artists` or tagged with any of `genres`
    async fn songs_by_artists_or_genres(
        &self,
        artists: &[String],
        genres: &[String],
        limit: usize,
    ) -> AppResult<Vec<SongMetadata>>;

    /// Songs played by any of `user_ids`, most played first
    async fn songs_heard_by(
        &self,
        user_ids: &[String],
        exclude: &[String],
        limit: usize,
    ) -> AppResult<Vec<String>>;

    /// Songs ordered by number of distinct listeners
    async fn popular_songs(&self, exclude: &[String], limit: usize) -> AppResult<Vec<String>>;

    async fn random_songs(&self, exclude: &[String], limit: usize) -> AppResult<Vec<String>>;

    /// Inserts song metadata if the id is unknown. Returns true when inserted.
    async fn upsert_song(&self, song: &SongMetadata) -> AppResult<bool>;
}

const SQL_LISTENING_HISTORY: &str = r#"
SELECT song_id, play_count, last_played
FROM music_history
WHERE user_id = $1
"#;

const SQL_LISTENING_EVENT_COUNT: &str = r#"
SELECT COALESCE(SUM(play_count), 0)::BIGINT
FROM music_history
WHERE user_id = $1
"#;

const SQL_PREFERENCE_WEIGHTS: &str = r#"
SELECT dimension, name, weight
FROM music_preferences
WHERE user_id = $1
ORDER BY weight DESC, name
"#;

const SQL_LOCATION: &str = r#"
SELECT latitude, longitude, updated_at
FROM user_locations
WHERE user_id = $1
"#;

const SQL_DATING_PREFERENCES: &str = r#"
SELECT preferred_gender, min_age, max_age, max_distance, is_visible
FROM dating_preferences
WHERE user_id = $1
"#;

const SQL_SONG_COLUMNS: &str = "id AS song_id, title, artists, genre, release_year, language";

const SQL_CANDIDATE_POOL: &str = r#"
SELECT
    u.id AS user_id, u.gender, u.birth_date,
    (u.is_visible AND COALESCE(dp.is_visible, TRUE)) AS is_visible,
    l.latitude, l.longitude
FROM users u
JOIN user_locations l ON l.user_id = u.id
LEFT JOIN dating_preferences dp ON dp.user_id = u.id
WHERE u.id <> $1
    AND u.is_visible
    AND COALESCE(dp.is_visible, TRUE)
    AND l.latitude BETWEEN $2 AND $3
    AND l.longitude BETWEEN $4 AND $5
    AND ($6::TEXT IS NULL OR LOWER(btrim(u.gender)) = LOWER($6))
    AND u.birth_date BETWEEN $7 AND $8
ORDER BY
    power(l.latitude - $9::DOUBLE PRECISION, 2)
        + power((l.longitude - $10::DOUBLE PRECISION) * cos(radians($9::DOUBLE PRECISION)), 2),
    u.id
LIMIT $11
"#;

const SQL_ONBOARDING_GENRES: &str = r#"
SELECT name
FROM music_preferences
WHERE user_id = $1 AND dimension = 'genre' AND is_onboarding
ORDER BY weight DESC, name
"#;

const SQL_SONGS_BY_GENRE: &str = r#"
SELECT s.id AS song_id, s.title, s.artists, s.genre, s.release_year, s.language
FROM songs s
LEFT JOIN (
    SELECT song_id, COUNT(DISTINCT user_id) AS listeners
    FROM music_history
    GROUP BY song_id
) h ON h.song_id = s.id
WHERE LOWER(s.genre) = LOWER($1)
ORDER BY COALESCE(h.listeners, 0) DESC, s.id
LIMIT $2
"#;

const SQL_SONGS_BY_ARTISTS_OR_GENRES: &str = r#"
SELECT s.id AS song_id, s.title, s.artists, s.genre, s.release_year, s.language
FROM songs s
WHERE s.genre = ANY($1)
    OR EXISTS (
        SELECT 1
        FROM unnest(string_to_array(s.artists, ',')) AS credit(name)
        WHERE btrim(credit.name) = ANY($2)
    )
ORDER BY
    EXISTS (
        SELECT 1
        FROM unnest(string_to_array(s.artists, ',')) AS credit(name)
        WHERE btrim(credit.name) = ANY($2)
    ) DESC,
    s.id
LIMIT $3
"#;

const SQL_SONGS_HEARD_BY: &str = r#"
SELECT song_id
FROM music_history
WHERE user_id = ANY($1) AND NOT (song_id = ANY($2))
GROUP BY song_id
ORDER BY SUM(play_count) DESC, song_id
LIMIT $3
"#;

const SQL_POPULAR_SONGS: &str = r#"
SELECT song_id
FROM music_history
WHERE NOT (song_id = ANY($1))
GROUP BY song_id
ORDER BY COUNT(DISTINCT user_id) DESC, song_id
LIMIT $2
"#;

const SQL_RANDOM_SONGS: &str = r#"
SELECT id
FROM songs
WHERE NOT (id = ANY($1))
ORDER BY RANDOM()
LIMIT $2
"#;

const SQL_INSERT_SONG: &str = r#"
INSERT INTO songs (id, title, artists, genre, release_year, language)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (id) DO NOTHING
"#;

#[derive(sqlx::FromRow)]
struct PreferenceRow {
    dimension: String,
    name: String,
    weight: f64,
}

/// PostgreSQL-backed signal store
#[derive(Clone)]
pub struct PgSignalStore {
    pool: PgPool,
    monitor: SlowQueryMonitor,
}

impl PgSignalStore {
    pub fn new(pool: PgPool, monitor: SlowQueryMonitor) -> Self {
        Self { pool, monitor }
    }
}

#[async_trait::async_trait]
impl SignalStore for PgSignalStore {
    async fn listening_history(&self, user_id: &str) -> AppResult<Vec<ListeningRecord>> {
        let rows = self
            .monitor
            .observe(
                "listening_history",
                sqlx::query_as::<_, ListeningRecord>(SQL_LISTENING_HISTORY)
                    .bind(user_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows)
    }

    async fn listening_event_count(&self, user_id: &str) -> AppResult<i64> {
        let count = self
            .monitor
            .observe(
                "listening_event_count",
                sqlx::query_scalar::<_, i64>(SQL_LISTENING_EVENT_COUNT)
                    .bind(user_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(count)
    }

    async fn preference_weights(&self, user_id: &str) -> AppResult<PreferenceWeights> {
        let rows = self
            .monitor
            .observe(
                "preference_weights",
                sqlx::query_as::<_, PreferenceRow>(SQL_PREFERENCE_WEIGHTS)
                    .bind(user_id)
                    .fetch_all(&self.pool),
            )
            .await?;

        let mut weights = PreferenceWeights::default();
        for row in rows {
            let entry = WeightedName::new(row.name, row.weight);
            match row.dimension.as_str() {
                "genre" => weights.genres.push(entry),
                "artist" => weights.artists.push(entry),
                "language" => weights.languages.push(entry),
                other => {
                    tracing::warn!(user_id = %user_id, dimension = %other, "Unknown preference dimension");
                }
            }
        }

        Ok(weights)
    }

    async fn location(&self, user_id: &str) -> AppResult<Option<Location>> {
        let location = self
            .monitor
            .observe(
                "location",
                sqlx::query_as::<_, Location>(SQL_LOCATION)
                    .bind(user_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(location)
    }

    async fn dating_preferences(&self, user_id: &str) -> AppResult<Option<DatingPreference>> {
        let prefs = self
            .monitor
            .observe(
                "dating_preferences",
                sqlx::query_as::<_, DatingPreference>(SQL_DATING_PREFERENCES)
                    .bind(user_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(prefs)
    }

    async fn song_metadata(&self, song_id: &str) -> AppResult<Option<SongMetadata>> {
        let sql = format!("SELECT {} FROM songs WHERE id = $1", SQL_SONG_COLUMNS);
        let song = self
            .monitor
            .observe(
                "song_metadata",
                sqlx::query_as::<_, SongMetadata>(&sql)
                    .bind(song_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(song)
    }

    async fn songs_metadata(&self, song_ids: &[String]) -> AppResult<Vec<SongMetadata>> {
        if song_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {} FROM songs WHERE id = ANY($1)", SQL_SONG_COLUMNS);
        let songs = self
            .monitor
            .observe(
                "songs_metadata",
                sqlx::query_as::<_, SongMetadata>(&sql)
                    .bind(song_ids)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(songs)
    }

    async fn candidate_pool(
        &self,
        user_id: &str,
        query: &CandidatePoolQuery,
    ) -> AppResult<Vec<CandidateProfile>> {
        let rows = self
            .monitor
            .observe(
                "candidate_pool",
                sqlx::query_as::<_, CandidateProfile>(SQL_CANDIDATE_POOL)
                    .bind(user_id)
                    .bind(query.bounds.min_lat)
                    .bind(query.bounds.max_lat)
                    .bind(query.bounds.min_lon)
                    .bind(query.bounds.max_lon)
                    .bind(query.preferred_gender.as_deref())
                    .bind(query.earliest_birth)
                    .bind(query.latest_birth)
                    .bind(query.origin_lat)
                    .bind(query.origin_lon)
                    .bind(query.limit)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows)
    }

    async fn onboarding_genres(&self, user_id: &str) -> AppResult<Vec<String>> {
        let genres = self
            .monitor
            .observe(
                "onboarding_genres",
                sqlx::query_scalar::<_, String>(SQL_ONBOARDING_GENRES)
                    .bind(user_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(genres)
    }

    async fn songs_by_genre(&self, genre: &str, limit: usize) -> AppResult<Vec<SongMetadata>> {
        let songs = self
            .monitor
            .observe(
                "songs_by_genre",
                sqlx::query_as::<_, SongMetadata>(SQL_SONGS_BY_GENRE)
                    .bind(genre)
                    .bind(limit as i64)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(songs)
    }

    async fn songs_by_artists_or_genres(
        &self,
        artists: &[String],
        genres: &[String],
        limit: usize,
    ) -> AppResult<Vec<SongMetadata>> {
        if artists.is_empty() && genres.is_empty() {
            return Ok(Vec::new());
        }

        let songs = self
            .monitor
            .observe(
                "songs_by_artists_or_genres",
                sqlx::query_as::<_, SongMetadata>(SQL_SONGS_BY_ARTISTS_OR_GENRES)
                    .bind(genres)
                    .bind(artists)
                    .bind(limit as i64)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(songs)
    }

    async fn songs_heard_by(
        &self,
        user_ids: &[String],
        exclude: &[String],
        limit: usize,
    ) -> AppResult<Vec<String>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let songs = self
            .monitor
            .observe(
                "songs_heard_by",
                sqlx::query_scalar::<_, String>(SQL_SONGS_HEARD_BY)
                    .bind(user_ids)
                    .bind(exclude)
                    .bind(limit as i64)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(songs)
    }

    async fn popular_songs(&self, exclude: &[String], limit: usize) -> AppResult<Vec<String>> {
        let songs = self
            .monitor
            .observe(
                "popular_songs",
                sqlx::query_scalar::<_, String>(SQL_POPULAR_SONGS)
                    .bind(exclude)
                    .bind(limit as i64)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(songs)
    }

    async fn random_songs(&self, exclude: &[String], limit: usize) -> AppResult<Vec<String>> {
        let songs = self
            .monitor
            .observe(
                "random_songs",
                sqlx::query_scalar::<_, String>(SQL_RANDOM_SONGS)
                    .bind(exclude)
                    .bind(limit as i64)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(songs)
    }

    async fn upsert_song(&self, song: &SongMetadata) -> AppResult<bool> {
        let result = self
            .monitor
            .observe(
                "upsert_song",
                sqlx::query(SQL_INSERT_SONG)
                    .bind(&song.song_id)
                    .bind(&song.title)
                    .bind(&song.artists)
                    .bind(&song.genre)
                    .bind(song.release_year)
                    .bind(&song.language)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
