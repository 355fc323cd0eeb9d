use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::store::KvStore;
use crate::error::AppResult;
use crate::models::UserPair;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    MatchScore(UserPair),
    SongRecommendations(String),
    UserRecommendations(String),
    /// Catalog response, keyed by endpoint and arguments
    Catalog(String),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::MatchScore(pair) => write!(f, "score:{}:{}", pair.first(), pair.second()),
            CacheKey::SongRecommendations(user_id) => write!(f, "recs:songs:{}", user_id),
            CacheKey::UserRecommendations(user_id) => write!(f, "recs:users:{}", user_id),
            CacheKey::Catalog(query) => write!(f, "catalog:{}", query),
        }
    }
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Typed JSON cache over the shared key-value store
///
/// The cache is never authoritative: read failures degrade to a miss and
/// write failures are logged without affecting the caller's result.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KvStore>,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task and waits until queued writes are flushed
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task failed to join");
        }
    }
}

impl Cache {
    /// Creates a new Cache instance with an async write background task
    pub fn new(store: Arc<dyn KvStore>) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer_store = store.clone();
        let task = tokio::spawn(async move {
            Self::cache_writer_task(writer_store, write_rx, shutdown_rx).await;
        });

        (Self { store, write_tx }, CacheWriterHandle { shutdown_tx, task })
    }

    /// Background task that processes cache write messages
    ///
    /// On shutdown, drains whatever is already queued before exiting.
    async fn cache_writer_task(
        store: Arc<dyn KvStore>,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = store.set_ex(&msg.key, &msg.value, msg.ttl).await {
                        tracing::error!(error = %e, key = %msg.key, "Failed to write to cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    let mut flushed = 0usize;
                    while let Ok(msg) = write_rx.try_recv() {
                        if let Err(e) = store.set_ex(&msg.key, &msg.value, msg.ttl).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                        flushed += 1;
                    }

                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    /// Retrieves a value from the cache by key
    ///
    /// Store errors and undecodable entries are reported as a miss.
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let key = key.to_string();
        let cached = match self.store.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, treating as miss");
                return Ok(None);
            }
        };

        match cached {
            Some(json) => match serde_json::from_str(&json) {
                Ok(data) => Ok(Some(data)),
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Cache deserialization error, treating as miss");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Stores a value and waits for the write to complete
    pub async fn set<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        if let Err(e) = self.store.set_ex(&key.to_string(), &json, ttl).await {
            tracing::warn!(error = %e, key = %key, "Cache write failed");
        }
    }

    /// Stores a value in the cache asynchronously without blocking
    ///
    /// The value is serialized here and handed to the background writer.
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let msg = CacheWriteMessage {
            key: key.to_string(),
            value: json,
            ttl,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }

    /// Removes an entry so the next read recomputes it
    pub async fn invalidate(&self, key: &CacheKey) -> AppResult<()> {
        self.store.del(&key.to_string()).await
    }
}
