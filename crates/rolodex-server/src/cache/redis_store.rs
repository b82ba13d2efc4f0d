//! Redis-backed `CacheStore`.
//!
//! Multi-key writes and deletes go through `MULTI/EXEC` pipelines so related
//! keys change together. The reset counter is created with its expiry and
//! incremented in the same transaction. Time-ordered indexes are sorted sets
//! scored by milliseconds since the epoch.

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, RedisError};
use std::time::Duration;

use super::store::{
    CacheStore, IndexedEntry, MAX_TTL, StoreError, StoreInfo, WindowCount, retention_millis,
};

pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool for `url` with the given size and timeouts. No connection
    /// is opened until first use.
    pub fn connect(url: &str, pool_size: usize, timeout: Duration) -> Result<Self, StoreError> {
        let mut config = deadpool_redis::Config::from_url(url);
        let mut pool_config = deadpool_redis::PoolConfig::new(pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("failed to create Redis pool: {e}")))?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to get Redis connection: {e}")))
    }
}

fn map_redis_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.min(MAX_TTL).as_millis() as u64).max(1)
}

/// Parse the `key:value` lines of an `INFO` reply.
fn parse_info(info: &str) -> StoreInfo {
    let mut stats = StoreInfo {
        backend: "redis",
        connected_clients: 0,
        used_memory: "0B".to_string(),
        hit_count: 0,
        miss_count: 0,
        version: "unknown".to_string(),
    };

    for line in info.lines() {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        match name {
            "connected_clients" => stats.connected_clients = value.parse().unwrap_or(0),
            "used_memory_human" => stats.used_memory = value.to_string(),
            "keyspace_hits" => stats.hit_count = value.parse().unwrap_or(0),
            "keyspace_misses" => stats.miss_count = value.parse().unwrap_or(0),
            "redis_version" => stats.version = value.to_string(),
            _ => {}
        }
    }
    stats
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(map_redis_error)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(values)
    }

    async fn set_many(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let ttl_ms = ttl_millis(ttl);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, data) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(data.as_slice())
                .arg("PX")
                .arg(ttl_ms)
                .ignore();
        }

        let mut conn = self.conn().await?;
        let _: () = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        conn.del::<_, u64>(keys).await.map_err(map_redis_error)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.conn().await?;
        let (count, pttl): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("PX")
            .arg(ttl_millis(window))
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(WindowCount {
            count,
            resets_in: Duration::from_millis(pttl.max(0) as u64),
        })
    }

    async fn append_indexed(
        &self,
        index: &str,
        entry: IndexedEntry<'_>,
        retention: Duration,
    ) -> Result<(), StoreError> {
        let ttl_ms = ttl_millis(retention);
        let cutoff = entry.score.saturating_sub(retention_millis(retention));
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(entry.key)
            .arg(entry.data)
            .arg("PX")
            .arg(ttl_ms)
            .ignore()
            .cmd("ZADD")
            .arg(index)
            .arg(entry.score)
            .arg(entry.key)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(index)
            .arg("-inf")
            .arg(format!("({cutoff}"))
            .ignore()
            .cmd("PEXPIRE")
            .arg(index)
            .arg(ttl_ms)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn newest_indexed(&self, index: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        redis::cmd("ZREVRANGE")
            .arg(index)
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let mut conn = self.conn().await?;
        let info: String = redis::cmd("INFO")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(parse_info(&info))
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_reply_is_parsed() {
        let reply = "# Server\r\nredis_version:7.2.4\r\n# Clients\r\nconnected_clients:3\r\n\
                     # Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n\
                     # Stats\r\nkeyspace_hits:120\r\nkeyspace_misses:8\r\n";
        let info = parse_info(reply);
        assert_eq!(info.version, "7.2.4");
        assert_eq!(info.connected_clients, 3);
        assert_eq!(info.used_memory, "1.00M");
        assert_eq!(info.hit_count, 120);
        assert_eq!(info.miss_count, 8);
    }

    #[test]
    fn sub_millisecond_ttl_rounds_up() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
        assert_eq!(
            ttl_millis(Duration::from_secs(u64::MAX)),
            MAX_TTL.as_millis() as u64
        );
    }
}
