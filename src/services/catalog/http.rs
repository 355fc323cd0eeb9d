/// JSON catalog client (Deezer-compatible API)
///
/// Every response is cached so repeated fallbacks do not hammer the upstream.
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::SongMetadata,
    services::catalog::CatalogProvider,
};

const SEARCH_CACHE_TTL: u64 = 3600; // 1 hour
const TRENDING_CACHE_TTL: u64 = 1800; // 30 minutes
const SONG_CACHE_TTL: u64 = 604800; // 1 week
const PROVIDER_NAME: &str = "http_catalog";

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: u64,
    title: Option<String>,
    artist: Option<ApiArtist>,
    #[serde(default)]
    contributors: Vec<ApiArtist>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrackList {
    #[serde(default)]
    data: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// A single-track lookup answers either with the track or an error object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiTrackResponse {
    Error { error: ApiError },
    Track(ApiTrack),
}

impl ApiTrack {
    fn into_song(self, genre: Option<&str>) -> SongMetadata {
        let artists = if self.contributors.is_empty() {
            self.artist.map(|a| a.name)
        } else {
            Some(
                self.contributors
                    .into_iter()
                    .map(|a| a.name)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };

        let release_year = self
            .release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse::<i32>().ok())
            .filter(|y| *y > 0);

        SongMetadata {
            song_id: self.id.to_string(),
            title: self.title,
            artists,
            genre: genre.map(str::to_string),
            release_year,
            language: None,
        }
    }
}

#[derive(Clone)]
pub struct HttpCatalog {
    http_client: HttpClient,
    api_url: String,
    api_key: Option<String>,
    cache: Cache,
}

impl HttpCatalog {
    pub fn new(
        cache: Cache,
        api_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            cache,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self.http_client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("access_token", key)]);
        }

        let response = request.send().await.map_err(|e| {
            AppError::UpstreamCatalogUnavailable(format!("request to {} failed: {}", path, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamCatalogUnavailable(format!(
                "catalog returned status {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    async fn search(&self, query: &str, limit: usize, genre: Option<&str>) -> AppResult<Vec<SongMetadata>> {
        let list: ApiTrackList = self
            .get_json("/search", &[("q", query.to_string()), ("limit", limit.to_string())])
            .await?;
        Ok(list
            .data
            .into_iter()
            .take(limit)
            .map(|track| track.into_song(genre))
            .collect())
    }
}

#[async_trait::async_trait]
impl CatalogProvider for HttpCatalog {
    async fn search_songs(&self, query: &str, limit: usize) -> AppResult<Vec<SongMetadata>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        cached!(
            self.cache,
            CacheKey::Catalog(format!("search:{}:{}", query, limit)),
            SEARCH_CACHE_TTL,
            async move {
                let songs = self.search(query, limit, None).await?;
                tracing::info!(
                    query = %query,
                    results = songs.len(),
                    provider = PROVIDER_NAME,
                    "Catalog search completed"
                );
                Ok::<_, AppError>(songs)
            }
        )
    }

    async fn songs_by_genre(&self, genre: &str, limit: usize) -> AppResult<Vec<SongMetadata>> {
        if genre.trim().is_empty() {
            return Ok(Vec::new());
        }

        cached!(
            self.cache,
            CacheKey::Catalog(format!("genre:{}:{}", genre.to_lowercase(), limit)),
            SEARCH_CACHE_TTL,
            async move {
                let songs = self.search(genre, limit, Some(genre)).await?;
                tracing::info!(
                    genre = %genre,
                    results = songs.len(),
                    provider = PROVIDER_NAME,
                    "Catalog genre lookup completed"
                );
                Ok::<_, AppError>(songs)
            }
        )
    }

    async fn trending(&self, limit: usize) -> AppResult<Vec<SongMetadata>> {
        cached!(
            self.cache,
            CacheKey::Catalog(format!("trending:{}", limit)),
            TRENDING_CACHE_TTL,
            async move {
                let list: ApiTrackList = self
                    .get_json("/chart/0/tracks", &[("limit", limit.to_string())])
                    .await?;
                let songs: Vec<SongMetadata> = list
                    .data
                    .into_iter()
                    .take(limit)
                    .map(|track| track.into_song(None))
                    .collect();
                tracing::info!(results = songs.len(), provider = PROVIDER_NAME, "Catalog chart fetched");
                Ok::<_, AppError>(songs)
            }
        )
    }

    async fn song(&self, song_id: &str) -> AppResult<Option<SongMetadata>> {
        if song_id.is_empty() || !song_id.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }

        cached!(
            self.cache,
            CacheKey::Catalog(format!("track:{}", song_id)),
            SONG_CACHE_TTL,
            async move {
                let response: ApiTrackResponse =
                    self.get_json(&format!("/track/{}", song_id), &[]).await?;
                match response {
                    ApiTrackResponse::Track(track) => Ok::<_, AppError>(Some(track.into_song(None))),
                    ApiTrackResponse::Error { error } => {
                        tracing::debug!(
                            song_id = %song_id,
                            message = ?error.message,
                            "Catalog has no such track"
                        );
                        Ok(None)
                    }
                }
            }
        )
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
