//! Deferred, batched rescoring of users whose listening signals changed.
//!
//! Producers only ever call [`RecalculationScheduler::notify_signal_changed`].
//! A single worker task owns the pending set: it records the user, arms a
//! coalescing timer if none is running, and drains the set when it fires.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::{
    config::EngineSettings,
    db::KvStore,
    error::{AppError, AppResult},
    services::{candidates::CandidateFilter, match_score::MatchScoreService},
};

pub const PENDING_SET_KEY: &str = "recalc:pending";
/// Safety-net expiry of the pending set
pub const PENDING_SET_TTL_SECS: u64 = 86_400;
/// Remaining TTL below which a non-empty pending set counts as stuck
pub const STUCK_TTL_THRESHOLD_SECS: i64 = 3_600;

const DRAIN_MAX_ATTEMPTS: u32 = 3;
const DRAIN_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Outcome counters of one drain run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    pub users_seen: usize,
    pub users_completed: usize,
    pub users_left_pending: usize,
    pub candidates_scored: usize,
    pub candidates_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecalculationStatus {
    pub pending: u64,
    pub ttl_seconds: Option<i64>,
    pub stuck: bool,
}

enum UserOutcome {
    Completed { scored: usize },
    Incomplete { scored: usize, failed: usize },
}

/// Pending-set bookkeeping and the drain procedure
pub struct Recalculator {
    kv: Arc<dyn KvStore>,
    candidates: CandidateFilter,
    scores: Arc<MatchScoreService>,
    settings: EngineSettings,
}

impl Recalculator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        candidates: CandidateFilter,
        scores: Arc<MatchScoreService>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            kv,
            candidates,
            scores,
            settings,
        }
    }

    /// Adds a user to the pending set; re-adding keeps the original position.
    /// Returns true if the user was not already pending.
    pub async fn mark_pending(&self, user_id: &str) -> AppResult<bool> {
        let enqueued_at = chrono::Utc::now().timestamp_millis() as f64;
        let added = self.kv.zadd_nx(PENDING_SET_KEY, user_id, enqueued_at).await?;
        self.kv.expire(PENDING_SET_KEY, PENDING_SET_TTL_SECS).await?;
        Ok(added)
    }

    /// Processes every pending user in enqueue order, batch by batch
    ///
    /// Fails only when the pending set itself cannot be read; per-user and
    /// per-candidate failures leave that user pending for the next run.
    pub async fn drain(&self) -> AppResult<DrainReport> {
        let pending = self.kv.zrange_all(PENDING_SET_KEY).await?;
        let mut report = DrainReport {
            users_seen: pending.len(),
            ..Default::default()
        };

        if pending.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            pending = pending.len(),
            batch_size = self.settings.recalc_batch_size.max(1),
            "Draining recalculation set"
        );

        let batch_size = self.settings.recalc_batch_size.max(1);
        for (batch_index, batch) in pending.chunks(batch_size).enumerate() {
            for user_id in batch {
                match self.recalculate_user(user_id).await {
                    Ok(UserOutcome::Completed { scored }) => {
                        report.candidates_scored += scored;
                        if let Err(e) = self.kv.zrem(PENDING_SET_KEY, user_id).await {
                            tracing::warn!(user_id = %user_id, error = %e, "Failed to clear pending user");
                            report.users_left_pending += 1;
                        } else {
                            report.users_completed += 1;
                        }
                    }
                    Ok(UserOutcome::Incomplete { scored, failed }) => {
                        report.candidates_scored += scored;
                        report.candidates_failed += failed;
                        report.users_left_pending += 1;
                    }
                    Err(AppError::LocationMissing(_)) => {
                        // nothing can be scored until the user sets a location
                        tracing::warn!(user_id = %user_id, "Pending user has no location, dropping");
                        if self.kv.zrem(PENDING_SET_KEY, user_id).await.is_ok() {
                            report.users_completed += 1;
                        } else {
                            report.users_left_pending += 1;
                        }
                    }
                    Err(e) => {
                        tracing::error!(user_id = %user_id, error = %e, "Recalculation failed, user stays pending");
                        report.users_left_pending += 1;
                    }
                }
            }

            tracing::debug!(batch = batch_index, users = batch.len(), "Recalculation batch done");
        }

        tracing::info!(
            completed = report.users_completed,
            left_pending = report.users_left_pending,
            scored = report.candidates_scored,
            failed = report.candidates_failed,
            "Recalculation drain finished"
        );

        Ok(report)
    }

    /// Drains with exponential backoff between whole-run failures
    pub async fn drain_with_retry(&self) -> Option<DrainReport> {
        for attempt in 1..=DRAIN_MAX_ATTEMPTS {
            match self.drain().await {
                Ok(report) => return Some(report),
                Err(e) if attempt < DRAIN_MAX_ATTEMPTS => {
                    let backoff = DRAIN_BACKOFF_BASE * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Recalculation drain failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(attempts = attempt, error = %e, "Recalculation drain gave up");
                }
            }
        }
        None
    }

    async fn recalculate_user(&self, user_id: &str) -> AppResult<UserOutcome> {
        let location = self.candidates.require_location(user_id).await?;
        let preferences = self.candidates.effective_preferences(user_id).await?;
        let candidates = self
            .candidates
            .find_candidates(
                user_id,
                &location,
                &preferences,
                self.settings.recalc_candidate_limit,
            )
            .await?;

        let mut tasks = JoinSet::new();
        for candidate in candidates {
            let scores = self.scores.clone();
            let user_id = user_id.to_string();
            tasks.spawn(async move {
                let result = scores.recompute(&user_id, &candidate.user_id).await;
                result.map_err(|e| AppError::CandidateScoringFailed {
                    user_id,
                    candidate_id: candidate.user_id,
                    reason: e.to_string(),
                })
            });
        }

        let mut scored = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => scored += 1,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Candidate scoring failed, skipping");
                    failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Candidate scoring task join error");
                    failed += 1;
                }
            }
        }

        if failed == 0 {
            Ok(UserOutcome::Completed { scored })
        } else {
            Ok(UserOutcome::Incomplete { scored, failed })
        }
    }

    pub async fn status(&self) -> AppResult<RecalculationStatus> {
        let pending = self.kv.zcard(PENDING_SET_KEY).await?;
        let ttl_seconds = self.kv.ttl(PENDING_SET_KEY).await?;
        let stuck = pending > 0
            && ttl_seconds
                .map(|ttl| (0..STUCK_TTL_THRESHOLD_SECS).contains(&ttl))
                .unwrap_or(false);
        Ok(RecalculationStatus {
            pending,
            ttl_seconds,
            stuck,
        })
    }
}

enum SchedulerMessage {
    SignalChanged(String),
}

/// Fire-and-forget entry point for signal-change notifications
#[derive(Clone)]
pub struct RecalculationScheduler {
    tx: mpsc::UnboundedSender<SchedulerMessage>,
}

/// Handle for stopping the scheduler worker
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Recalculation worker failed to join");
        }
        tracing::info!("Recalculation worker stopped");
    }
}

impl RecalculationScheduler {
    /// Spawns the worker that owns the pending set
    pub fn spawn(recalculator: Arc<Recalculator>) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let delay = Duration::from_secs(recalculator.settings.recalc_delay_secs);

        let task = tokio::spawn(async move {
            Self::worker(recalculator, delay, rx, shutdown_rx).await;
        });

        (Self { tx }, SchedulerHandle { shutdown_tx, task })
    }

    /// Marks `user_id` for rescoring after the coalescing delay
    pub fn notify_signal_changed(&self, user_id: &str) {
        if let Err(e) = self
            .tx
            .send(SchedulerMessage::SignalChanged(user_id.to_string()))
        {
            tracing::error!(user_id = %user_id, error = %e, "Recalculation worker is gone");
        }
    }

    async fn worker(
        recalculator: Arc<Recalculator>,
        delay: Duration,
        mut rx: mpsc::UnboundedReceiver<SchedulerMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(delay_secs = delay.as_secs(), "Recalculation worker started");
        let mut drain_at: Option<Instant> = None;

        // users left by an earlier process still need a pass
        match recalculator.status().await {
            Ok(status) if status.pending > 0 => {
                tracing::info!(pending = status.pending, "Pending recalculations found at startup");
                drain_at = Some(Instant::now() + delay);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not read pending recalculations at startup"),
        }

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(SchedulerMessage::SignalChanged(user_id)) = message else {
                        break;
                    };
                    match recalculator.mark_pending(&user_id).await {
                        Ok(added) => tracing::debug!(user_id = %user_id, added, "User marked pending"),
                        Err(e) => tracing::error!(user_id = %user_id, error = %e, "Failed to mark user pending"),
                    }
                    if drain_at.is_none() {
                        drain_at = Some(Instant::now() + delay);
                    }
                }
                _ = tokio::time::sleep_until(drain_at.unwrap_or_else(Instant::now)), if drain_at.is_some() => {
                    drain_at = None;
                    // leftover users or a drain that gave up get another pass
                    let retry = match recalculator.drain_with_retry().await {
                        Some(report) => report.users_left_pending > 0,
                        None => true,
                    };
                    if retry {
                        tracing::info!(
                            retry_in_secs = delay.as_secs(),
                            "Recalculation drain left users pending, rescheduling"
                        );
                        drain_at = Some(Instant::now() + delay);
                    }
                    match recalculator.status().await {
                        Ok(status) if status.stuck => tracing::warn!(
                            pending = status.pending,
                            ttl_seconds = ?status.ttl_seconds,
                            "Recalculation set close to expiry with users still pending"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "Could not read recalculation status"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    }
}
