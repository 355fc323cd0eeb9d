pub mod ledger;
pub mod postgres;
pub mod redis;
pub mod signals;

pub use ledger::{MatchLedger, PgMatchLedger};
pub use postgres::{create_pool, run_migrations, SlowQueryMonitor};
pub use redis::{create_redis_client, Cache, CacheKey, CacheWriterHandle, KvStore, RedisStore};
pub use signals::{CandidatePoolQuery, PgSignalStore, SignalStore};
