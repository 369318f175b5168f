//! Redis backend

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{KeyTtl, KvError, KvStore};

/// Store backend on a shared multiplexed Redis connection
#[derive(Clone)]
pub struct RedisKvStore {
    conn: MultiplexedConnection,
}

impl RedisKvStore {
    /// Connect to Redis (`redis://` or `rediss://`)
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        tracing::info!(tls = url.starts_with("rediss://"), "Connected to Redis");

        Ok(Self { conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait::async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let value: Option<String> = self.conn().get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let _: () = self.conn().set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError> {
        let secs: i64 = self.conn().ttl(key).await?;
        Ok(KeyTtl::from_seconds(secs))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let set: bool = self.conn().expire(key, ttl.as_secs().max(1) as i64).await?;
        Ok(set)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let _: () = self.conn().hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let value: Option<String> = self.conn().hget(key, field).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let values: HashMap<String, String> = self.conn().hgetall(key).await?;
        Ok(values)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), KvError> {
        let _: () = self.conn().zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let _: () = self.conn().zrem(key, member).await?;
        Ok(())
    }

    async fn zpop_by_score(&self, key: &str, max_score: i64) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn();

        // MULTI/EXEC so a member added between the read and the remove is
        // neither lost nor returned twice
        let (members,): (Vec<String>,) = redis::pipe()
            .atomic()
            .zrangebyscore(key, "-inf", max_score)
            .zrembyscore(key, "-inf", max_score)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(members)
    }
}
