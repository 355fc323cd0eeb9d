use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use harmony_match::{
    api::{create_router, AppState},
    config::Config,
    db::{
        create_pool, create_redis_client, run_migrations, Cache, KvStore, PgMatchLedger,
        PgSignalStore, RedisStore, SlowQueryMonitor,
    },
    services::HttpCatalog,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("harmony_match=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let settings = config.engine_settings();

    // Postgres
    let pool = create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    let monitor = SlowQueryMonitor::new(Duration::from_millis(config.slow_query_ms));
    tracing::info!(max_connections = config.db_max_connections, "Postgres ready");

    // Redis
    let redis_client = create_redis_client(&config.redis_url)?;
    let kv: Arc<dyn KvStore> = Arc::new(
        RedisStore::connect(redis_client)
            .await
            .context("Failed to connect to Redis")?,
    );
    let (cache, cache_handle) = Cache::new(kv.clone());
    tracing::info!("Redis ready");

    let catalog = HttpCatalog::new(
        cache.clone(),
        config.catalog_api_url.clone(),
        config.catalog_api_key.clone(),
        Duration::from_millis(config.catalog_timeout_ms),
    )?;

    let (state, scheduler_handle) = AppState::new(
        Arc::new(PgSignalStore::new(pool.clone(), monitor)),
        Arc::new(PgMatchLedger::new(pool.clone(), monitor)),
        kv,
        cache,
        Arc::new(catalog),
        settings,
    );

    let app = create_router(state).layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, shutting down background workers");
    scheduler_handle.shutdown().await;
    cache_handle.shutdown().await;
    pool.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        return;
    }
    tracing::info!("Shutdown signal received");
}
