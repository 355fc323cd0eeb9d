pub mod cache;
pub mod store;

mod macros;

pub use cache::{Cache, CacheKey, CacheWriterHandle};
pub use store::{create_redis_client, KvStore, RedisStore};
