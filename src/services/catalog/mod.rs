//! Music catalog abstraction
//!
//! The catalog is an external, best-effort source of song metadata. Callers
//! treat any error from it as "no songs from this source" and move on to the
//! next fallback tier.
use std::sync::Arc;

use crate::{db::SignalStore, error::AppResult, models::SongMetadata};

pub mod http;

pub use http::HttpCatalog;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Free-text song search
    async fn search_songs(&self, query: &str, limit: usize) -> AppResult<Vec<SongMetadata>>;

    /// Songs for a genre; results carry that genre in their metadata
    async fn songs_by_genre(&self, genre: &str, limit: usize) -> AppResult<Vec<SongMetadata>>;

    /// Currently charting songs
    async fn trending(&self, limit: usize) -> AppResult<Vec<SongMetadata>>;

    /// Single song by catalog id
    async fn song(&self, song_id: &str) -> AppResult<Option<SongMetadata>>;

    fn name(&self) -> &'static str;
}

/// Single entry point for persisting songs discovered outside the local store
///
/// Every path that meets an unknown song id goes through here, so the store
/// sees one idempotent insert-if-absent per song.
#[derive(Clone)]
pub struct SongIngestor {
    store: Arc<dyn SignalStore>,
    catalog: Arc<dyn CatalogProvider>,
}

impl SongIngestor {
    pub fn new(store: Arc<dyn SignalStore>, catalog: Arc<dyn CatalogProvider>) -> Self {
        Self { store, catalog }
    }

    /// Persists `song` unless it is already known. Returns true if inserted.
    pub async fn ensure_song_present(&self, song: &SongMetadata) -> AppResult<bool> {
        let inserted = self.store.upsert_song(song).await?;
        if inserted {
            tracing::debug!(song_id = %song.song_id, "Ingested catalog song");
        }
        Ok(inserted)
    }

    /// Looks `song_id` up in the catalog if it is unknown locally
    ///
    /// A catalog failure is logged and reported as "not inserted"; only
    /// local store errors propagate.
    pub async fn ensure_song_id_present(&self, song_id: &str) -> AppResult<bool> {
        if self.store.song_metadata(song_id).await?.is_some() {
            return Ok(false);
        }

        match self.catalog.song(song_id).await {
            Ok(Some(song)) => self.ensure_song_present(&song).await,
            Ok(None) => {
                tracing::warn!(song_id = %song_id, provider = self.catalog.name(), "Song not found in catalog");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(
                    song_id = %song_id,
                    provider = self.catalog.name(),
                    error = %e,
                    "Catalog lookup failed, song left unknown"
                );
                Ok(false)
            }
        }
    }

    /// Ingests a batch of catalog songs, logging rather than failing per song
    pub async fn ensure_songs_present(&self, songs: &[SongMetadata]) -> usize {
        let mut inserted = 0;
        for song in songs {
            match self.ensure_song_present(song).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(song_id = %song.song_id, error = %e, "Failed to ingest song");
                }
            }
        }
        inserted
    }
}
