use sqlx::{postgres::PgPoolOptions, PgPool};
use std::future::Future;
use std::time::{Duration, Instant};

/// Creates a PostgreSQL connection pool
///
/// Connections are checked out per query and returned to the pool when the
/// query future completes or is dropped, on every exit path.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Reports storage operations that exceed a latency threshold
#[derive(Debug, Clone, Copy)]
pub struct SlowQueryMonitor {
    threshold: Duration,
}

impl SlowQueryMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Awaits `operation`, logging a warning if it took longer than the threshold
    pub async fn observe<F, T>(&self, name: &'static str, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let output = operation.await;
        let elapsed = start.elapsed();

        if elapsed > self.threshold {
            tracing::warn!(
                operation = name,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "Slow storage operation"
            );
        }

        output
    }
}

impl Default for SlowQueryMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}
