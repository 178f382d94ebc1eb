//! Conversation store abstraction.
//!
//! GroupWarden keeps all shared state — dialog state, group membership,
//! message logs, mention records and their indexes — in a key-value store
//! with hash, set and sorted-set primitives. This module defines the
//! [`ConversationStore`] trait the rest of the bot programs against, plus
//! the key layout. The Redis backend lives in [`redis`]; the in-memory
//! backend in [`memory`] backs tests.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// A single removal operation for batched cleanup.
///
/// The mention sweep must remove a record and its index entries as one
/// logical unit; backends execute a batch in a single round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOp {
    /// Delete a plain key
    Del(String),
    /// Remove a field from a hash
    Hdel(String, String),
    /// Remove a member from a set
    Srem(String, String),
    /// Remove a member from a sorted set
    Zrem(String, String),
}

/// Key-value store with hash, set and sorted-set primitives.
///
/// Sorted sets keep stable ordering by score (creation time for mention
/// indexes); removal is by member value.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Get a plain key. Missing keys yield `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Set a plain key, replacing any prior value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Delete a plain key. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Get one hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    /// Set one hash field, replacing any prior value.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    /// Get every field of a hash. Missing hashes yield an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    /// Remove one hash field. Idempotent.
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;

    /// Add a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    /// List set members. Missing sets yield an empty vec.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    /// Remove a member from a set. Idempotent.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// Add a member to a sorted set with the given score, updating the
    /// score if the member already exists.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    /// Range by rank, inclusive; negative indexes count from the end
    /// (`0, -1` is the whole set, ascending by score).
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    /// Range by score, inclusive bounds, ascending.
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;
    /// Remove a member from a sorted set. Idempotent.
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// Execute a batch of removals in one round trip.
    ///
    /// Used by the sweep to drop a mention record together with both of
    /// its index entries; a dangling index entry is a correctness bug.
    async fn remove_batch(&self, ops: Vec<RemoveOp>) -> Result<()>;
}

/// Key layout for everything GroupWarden writes.
///
/// All keys carry the configured prefix so several bot instances can
/// share one Redis database.
pub mod keys {
    /// Hash of room id -> serialized dialog state.
    pub fn dialog(prefix: &str) -> String {
        format!("{prefix}:dialog")
    }

    /// One mention record, keyed by chat and message id.
    pub fn mention(prefix: &str, chat_id: &str, message_id: &str) -> String {
        format!("{prefix}:mention:{chat_id}:{message_id}")
    }

    /// Per-user sorted set of mention record keys, scored by creation time.
    pub fn user_mentions(prefix: &str, user: &str) -> String {
        format!("{prefix}:mentions:user:{user}")
    }

    /// Per-chat sorted set of mention record keys, scored by creation time.
    pub fn chat_mentions(prefix: &str, chat_id: &str) -> String {
        format!("{prefix}:mentions:chat:{chat_id}")
    }

    /// Set of users that currently have at least one pending mention.
    pub fn mention_users(prefix: &str) -> String {
        format!("{prefix}:mentions:users")
    }

    /// Set of group chat ids the bot has seen.
    pub fn groups(prefix: &str) -> String {
        format!("{prefix}:groups")
    }

    /// Hash of group metadata fields (currently just `title`).
    pub fn group_meta(prefix: &str, chat_id: &str) -> String {
        format!("{prefix}:group:{chat_id}")
    }

    /// Plain key holding a chat's rules text.
    pub fn rules(prefix: &str, chat_id: &str) -> String {
        format!("{prefix}:rules:{chat_id}")
    }

    /// Per-chat sorted set of recent message log entries, scored by time.
    pub fn chat_log(prefix: &str, chat_id: &str) -> String {
        format!("{prefix}:log:{chat_id}")
    }
}
