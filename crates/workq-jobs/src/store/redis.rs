//! Redis-backed sorted-set store.

use super::{Promotion, SortedSetStore};
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use parking_lot::RwLock;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};
use workq_config::RedisConfig;

/// Create a Redis connection pool and check it answers.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool for the job queue...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .create_timeout(Some(config.connect_timeout()))
        .wait_timeout(Some(config.connect_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {e}")))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

fn score_bound(value: f64) -> String {
    if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if value == f64::INFINITY {
        "+inf".to_string()
    } else {
        value.to_string()
    }
}

/// Sorted-set store over a deadpool Redis pool.
///
/// Dequeue relies on `ZPOPMIN`; promotion runs as one Lua script. The script
/// writes to queue keys it derives itself, so only a single Redis node is
/// supported, not Redis Cluster.
pub struct RedisStore {
    pool: RwLock<Pool>,
    config: RedisConfig,
    promote_script: Script,
}

impl RedisStore {
    /// Wraps an existing pool.
    pub fn new(pool: Pool, config: RedisConfig) -> Self {
        Self {
            pool: RwLock::new(pool),
            config,
            promote_script: Script::new(include_str!("promote_delayed.lua")),
        }
    }

    /// Builds the pool and wraps it.
    pub async fn connect(config: &RedisConfig) -> JobResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool, config.clone()))
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<Connection> {
        let pool = self.pool.read().clone();
        Ok(pool.get().await?)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("pool_size", &self.config.pool_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SortedSetStore for RedisStore {
    async fn add(&self, key: &str, member: &str, score: f64) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn pop_min(&self, key: &str) -> JobResult<Option<(String, f64)>> {
        let mut conn = self.conn().await?;

        // ZPOPMIN removes and returns in one step, so no two workers can get the same member
        let popped: Vec<(String, f64)> = conn.zpopmin(key, 1).await?;
        Ok(popped.into_iter().next())
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> JobResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let (min, max) = (score_bound(min), score_bound(max));

        let members: Vec<String> = match limit {
            Some(count) => {
                let count = isize::try_from(count).unwrap_or(isize::MAX);
                conn.zrangebyscore_limit(key, min, max, 0, count).await?
            }
            None => conn.zrangebyscore(key, min, max).await?,
        };
        Ok(members)
    }

    async fn remove(&self, key: &str, member: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn cardinality(&self, key: &str) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn keys(&self, pattern: &str) -> JobResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: u64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn promote_due(
        &self,
        delayed_key: &str,
        queue_key_prefix: &str,
        now: f64,
        limit: usize,
    ) -> JobResult<Promotion> {
        let mut conn = self.conn().await?;

        let (moved, dropped): (u64, u64) = self
            .promote_script
            .key(delayed_key)
            .arg(score_bound(now))
            .arg(limit)
            .arg(queue_key_prefix)
            .invoke_async(&mut *conn)
            .await?;

        if moved > 0 || dropped > 0 {
            debug!(moved, dropped, "Promoted delayed entries");
        }
        Ok(Promotion { moved, dropped })
    }

    async fn ping(&self) -> JobResult<()> {
        let mut conn = self
            .conn()
            .await
            .map_err(|e| JobError::NotConnected(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| JobError::NotConnected(e.to_string()))?;
        Ok(())
    }

    async fn reconnect(&self) -> JobResult<()> {
        warn!(url = %self.config.url, "Reconnecting to Redis");
        let pool = create_pool(&self.config)
            .await
            .map_err(|e| JobError::NotConnected(e.to_string()))?;
        *self.pool.write() = pool;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert_eq!(score_bound(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_bound(f64::INFINITY), "+inf");
        assert_eq!(score_bound(12.5), "12.5");
    }

    #[test]
    fn test_promote_script_embeds_queue_fields() {
        let source = include_str!("promote_delayed.lua");
        assert!(source.contains("queue_name"));
        assert!(source.contains("priority"));
    }
}
