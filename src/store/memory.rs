//! In-memory conversation store.
//!
//! Implements the same semantics as the Redis backend over plain maps.
//! Used by tests and by `doctor` dry runs; not persisted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConversationStore, RemoveOp};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    kv: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    // member -> score; iteration sorts by (score, member) for stable order
    zsets: HashMap<String, BTreeMap<String, f64>>,
}

impl Inner {
    fn zset_sorted(&self, key: &str) -> Vec<(f64, String)> {
        let mut entries: Vec<(f64, String)> = self
            .zsets
            .get(key)
            .map(|m| m.iter().map(|(member, score)| (*score, member.clone())).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        entries
    }
}

/// Conversation store backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

// Inclusive rank range with Redis-style negative indexes.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .kv
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.inner.write().await.kv.remove(key);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .inner
            .read()
            .await
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .inner
            .read()
            .await
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        if let Some(h) = self.inner.write().await.hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut members: Vec<String> = self
            .inner
            .read()
            .await
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(s) = self.inner.write().await.sets.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.inner
            .write()
            .await
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let entries = inner.zset_sorted(key);
        let Some((start, stop)) = resolve_range(entries.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(entries[start..=stop].iter().map(|(_, m)| m.clone()).collect())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .zset_sorted(key)
            .into_iter()
            .filter(|(score, _)| *score >= min && *score <= max)
            .map(|(_, m)| m)
            .collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(z) = self.inner.write().await.zsets.get_mut(key) {
            z.remove(member);
        }
        Ok(())
    }

    async fn remove_batch(&self, ops: Vec<RemoveOp>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for op in ops {
            match op {
                RemoveOp::Del(key) => {
                    inner.kv.remove(&key);
                }
                RemoveOp::Hdel(key, field) => {
                    if let Some(h) = inner.hashes.get_mut(&key) {
                        h.remove(&field);
                    }
                }
                RemoveOp::Srem(key, member) => {
                    if let Some(s) = inner.sets.get_mut(&key) {
                        s.remove(&member);
                    }
                }
                RemoveOp::Zrem(key, member) => {
                    if let Some(z) = inner.zsets.get_mut(&key) {
                        z.remove(&member);
                    }
                }
            }
        }
        Ok(())
    }
}
