//! Redis backend for the conversation store.
//!
//! Uses a multiplexed `ConnectionManager` so the store handle can be
//! cloned cheaply across tasks; the manager reconnects on its own after
//! transient failures. Batched removals go through a single pipeline.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{ConversationStore, RemoveOp};
use crate::error::Result;

/// Conversation store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url` and build a connection manager.
    ///
    /// # Errors
    /// Returns a store error if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl ConversationStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(key, field).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.zrange(key, start, stop).await?)
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.zrangebyscore(key, min, max).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zrem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn remove_batch(&self, ops: Vec<RemoveOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                RemoveOp::Del(key) => {
                    pipe.del(key).ignore();
                }
                RemoveOp::Hdel(key, field) => {
                    pipe.hdel(key, field).ignore();
                }
                RemoveOp::Srem(key, member) => {
                    pipe.srem(key, member).ignore();
                }
                RemoveOp::Zrem(key, member) => {
                    pipe.zrem(key, member).ignore();
                }
            }
        }
        let mut conn = self.manager.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
