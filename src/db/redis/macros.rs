/// Get-or-compute over a [`Cache`](crate::db::Cache).
///
/// Returns the cached value for `$key` when present. Otherwise awaits
/// `$future`, propagates its error, queues the value for a background write
/// with `$ttl` seconds and returns it.
///
/// Expands to an `AppResult` expression, so it is meant as the tail of a
/// function returning `AppResult<T>` where `T` is the cached type.
///
/// ```rust,ignore
/// async fn trending(&self, limit: usize) -> AppResult<Vec<SongMetadata>> {
///     cached!(self.cache, CacheKey::Catalog(format!("trending:{}", limit)), 1800, async move {
///         self.fetch_chart(limit).await
///     })
/// }
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $future:expr) => {{
        let key = $key;
        match $cache.get_from_cache(&key).await? {
            Some(hit) => Ok(hit),
            None => {
                let value = $future.await?;
                $cache.set_in_background(&key, &value, $ttl);
                Ok(value)
            }
        }
    }};
}
