use redis::{aio::ConnectionManager, AsyncCommands, Client};

use crate::error::AppResult;

/// Key-value contract over the shared cache/queue store
///
/// Every operation touches a single key, so callers never need transactions.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()>;

    async fn del(&self, key: &str) -> AppResult<()>;

    /// Adds `member` to a sorted set unless already present. Returns true when added.
    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> AppResult<bool>;

    /// All members of a sorted set in ascending score order
    async fn zrange_all(&self, key: &str) -> AppResult<Vec<String>>;

    async fn zrem(&self, key: &str, member: &str) -> AppResult<()>;

    async fn zcard(&self, key: &str) -> AppResult<u64>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> AppResult<()>;

    /// Remaining lifetime in seconds; `None` if the key does not exist,
    /// `Some(-1)` if it exists without expiry
    async fn ttl(&self, key: &str) -> AppResult<Option<i64>>;
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Redis-backed store sharing one auto-reconnecting multiplexed connection
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(client: Client) -> AppResult<Self> {
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait::async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn zrange_all(&self, key: &str) -> AppResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = conn.zrange(key, 0, -1).await?;
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.manager.clone();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<i64>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = conn.ttl(key).await?;
        Ok(if ttl == -2 { None } else { Some(ttl) })
    }
}
