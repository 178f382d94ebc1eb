//! Mention tracking.
//!
//! Records "user A mentioned user B in chat C at time T" when a mention
//! arrives, detects later messages that answer it, and exposes the
//! queries the background sweep needs. Records live in the conversation
//! store as JSON, indexed twice: a per-user sorted set (for "notify this
//! user") and a per-chat sorted set (for "has anyone answered here"),
//! both scored by creation time. Removal must touch the record and both
//! indexes together; a dangling index entry is a correctness bug, so all
//! cleanup goes through one batched removal.

pub mod sweeper;

pub use sweeper::MentionSweeper;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::InboundMessage;
use crate::error::Result;
use crate::store::{keys, ConversationStore, RemoveOp};
use crate::utils::string::preview;

/// Maximum characters of source text stored with a mention.
const EXCERPT_CHARS: usize = 100;
/// Maximum entries kept in a chat's message log.
const CHAT_LOG_CAP: usize = 200;

/// Lifecycle of a tracked mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionStatus {
    /// Waiting for someone other than the mentioner to post
    Unresponded,
    /// A later message from a different author closed it out
    Responded,
    /// The mentioned user acknowledged it explicitly
    Read,
}

/// One tracked mention. Identity is `(chat_id, message_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMention {
    /// Chat the mention happened in
    pub chat_id: String,
    /// Message that contained the mention
    pub message_id: String,
    /// User who wrote the mention
    pub mentioner_id: String,
    /// User who was mentioned (resolved numeric ID)
    pub mentioned_id: String,
    /// Human-readable chat title, if known
    pub chat_title: Option<String>,
    /// Excerpt of the source message
    pub excerpt: String,
    /// When the mention was posted
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status
    pub status: MentionStatus,
}

impl PendingMention {
    /// Store key for this record.
    pub fn record_key(&self, prefix: &str) -> String {
        keys::mention(prefix, &self.chat_id, &self.message_id)
    }
}

/// One entry in a chat's message log: enough to replay "who spoke after
/// the mention" without keeping full message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogEntry {
    message_id: String,
    sender_id: String,
    ts: i64,
}

/// Records mentions and detects the messages that answer them.
pub struct MentionTracker {
    store: Arc<dyn ConversationStore>,
    prefix: String,
}

impl MentionTracker {
    /// Create a tracker over the given store.
    pub fn new(store: Arc<dyn ConversationStore>, key_prefix: &str) -> Self {
        Self {
            store,
            prefix: key_prefix.to_string(),
        }
    }

    /// Remember a username -> user ID binding observed on an inbound
    /// message, so plain `@username` mentions can be resolved later.
    pub async fn learn_user(&self, msg: &InboundMessage) -> Result<()> {
        if let Some(username) = &msg.sender_username {
            self.store
                .hset(&users_key(&self.prefix), username, &msg.sender_id)
                .await?;
        }
        Ok(())
    }

    /// Append a message to the chat log, pruning entries beyond the cap.
    pub async fn log_message(&self, msg: &InboundMessage) -> Result<()> {
        let key = keys::chat_log(&self.prefix, &msg.chat_id);
        let entry = LogEntry {
            message_id: msg.message_id.clone(),
            sender_id: msg.sender_id.clone(),
            ts: msg.timestamp.timestamp(),
        };
        self.store
            .zadd(&key, &serde_json::to_string(&entry)?, entry.ts as f64)
            .await?;

        let entries = self.store.zrange(&key, 0, -1).await?;
        if entries.len() > CHAT_LOG_CAP {
            let excess = entries.len() - CHAT_LOG_CAP;
            let ops = entries
                .into_iter()
                .take(excess)
                .map(|member| RemoveOp::Zrem(key.clone(), member))
                .collect();
            self.store.remove_batch(ops).await?;
        }
        Ok(())
    }

    /// Record the first trackable mention in a message, if any.
    ///
    /// A mention is trackable when it resolves to a numeric user ID
    /// (directly from the entity, or via a learned username binding) and
    /// does not point back at the sender. Returns the created record.
    pub async fn record_mention(&self, msg: &InboundMessage) -> Result<Option<PendingMention>> {
        let mut mentioned_id = None;
        for span in &msg.mentions {
            let resolved = match (&span.user_id, &span.username) {
                (Some(id), _) => Some(id.clone()),
                (None, Some(username)) => {
                    self.store.hget(&users_key(&self.prefix), username).await?
                }
                (None, None) => None,
            };
            match resolved {
                Some(id) if id != msg.sender_id => {
                    mentioned_id = Some(id);
                    break;
                }
                Some(_) => debug!(chat = %msg.chat_id, "ignoring self-mention"),
                None => debug!(chat = %msg.chat_id, "unresolvable mention, skipping"),
            }
        }
        let Some(mentioned_id) = mentioned_id else {
            return Ok(None);
        };

        let mention = PendingMention {
            chat_id: msg.chat_id.clone(),
            message_id: msg.message_id.clone(),
            mentioner_id: msg.sender_id.clone(),
            mentioned_id: mentioned_id.clone(),
            chat_title: msg.chat_title.clone(),
            excerpt: preview(&msg.content, EXCERPT_CHARS),
            created_at: msg.timestamp,
            status: MentionStatus::Unresponded,
        };

        let record_key = mention.record_key(&self.prefix);
        let score = mention.created_at.timestamp() as f64;
        self.store
            .set(&record_key, &serde_json::to_string(&mention)?)
            .await?;
        self.store
            .zadd(&keys::user_mentions(&self.prefix, &mentioned_id), &record_key, score)
            .await?;
        self.store
            .zadd(&keys::chat_mentions(&self.prefix, &msg.chat_id), &record_key, score)
            .await?;
        self.store
            .sadd(&keys::mention_users(&self.prefix), &mentioned_id)
            .await?;

        debug!(
            chat = %mention.chat_id,
            mentioned = %mention.mentioned_id,
            "recorded pending mention"
        );
        Ok(Some(mention))
    }

    /// Check the chat log for a response to `mention`: scan entries
    /// authored at or after its creation time in order and stop at the
    /// first author mismatch. The log never has to be read in full.
    pub async fn has_response_in_log(&self, mention: &PendingMention) -> Result<bool> {
        let key = keys::chat_log(&self.prefix, &mention.chat_id);
        // Same-second replies count, so the bound is inclusive and the
        // mention message itself is skipped by id.
        let after = mention.created_at.timestamp() as f64;
        let entries = self.store.zrangebyscore(&key, after, f64::MAX).await?;
        for raw in entries {
            let Ok(entry) = serde_json::from_str::<LogEntry>(&raw) else {
                continue;
            };
            if entry.message_id == mention.message_id {
                continue;
            }
            if entry.sender_id != mention.mentioner_id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Mark every pending mention in this chat that `msg` answers.
    ///
    /// Any message from an author other than the mentioner, arriving
    /// after the mention, closes it out. The record is rewritten with
    /// `Responded`; index entries stay until the sweep prunes them.
    pub async fn mark_responses(&self, msg: &InboundMessage) -> Result<usize> {
        let chat_key = keys::chat_mentions(&self.prefix, &msg.chat_id);
        let refs = self.store.zrange(&chat_key, 0, -1).await?;
        let mut closed = 0;
        for record_key in refs {
            let Some(mention) = self.load(&record_key).await? else {
                continue;
            };
            if mention.status != MentionStatus::Unresponded {
                continue;
            }
            if msg.sender_id == mention.mentioner_id {
                continue;
            }
            if msg.timestamp < mention.created_at {
                continue;
            }
            let mut updated = mention;
            updated.status = MentionStatus::Responded;
            self.store
                .set(&record_key, &serde_json::to_string(&updated)?)
                .await?;
            closed += 1;
        }
        Ok(closed)
    }

    /// Mark one mention as read (explicit acknowledgement).
    pub async fn mark_read(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        let record_key = keys::mention(&self.prefix, chat_id, message_id);
        let Some(mut mention) = self.load(&record_key).await? else {
            return Ok(false);
        };
        mention.status = MentionStatus::Read;
        self.store
            .set(&record_key, &serde_json::to_string(&mention)?)
            .await?;
        Ok(true)
    }

    /// Users that currently have at least one pending-mention index entry.
    pub async fn users_with_pending(&self) -> Result<Vec<String>> {
        self.store.smembers(&keys::mention_users(&self.prefix)).await
    }

    /// All mention records referenced by a user's index, in creation
    /// order. Dangling references (index entry without a record) are
    /// returned as `None` paired with their key so callers can prune.
    pub async fn mentions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<(String, Option<PendingMention>)>> {
        let refs = self
            .store
            .zrange(&keys::user_mentions(&self.prefix, user_id), 0, -1)
            .await?;
        let mut out = Vec::with_capacity(refs.len());
        for record_key in refs {
            let mention = self.load(&record_key).await?;
            out.push((record_key, mention));
        }
        Ok(out)
    }

    /// Remove a set of records together with both index entries, in one
    /// batched round trip, and drop users whose index went empty.
    pub async fn remove_mentions(&self, mentions: &[PendingMention]) -> Result<()> {
        if mentions.is_empty() {
            return Ok(());
        }
        let mut ops = Vec::with_capacity(mentions.len() * 3);
        for m in mentions {
            let record_key = m.record_key(&self.prefix);
            ops.push(RemoveOp::Del(record_key.clone()));
            ops.push(RemoveOp::Zrem(
                keys::user_mentions(&self.prefix, &m.mentioned_id),
                record_key.clone(),
            ));
            ops.push(RemoveOp::Zrem(
                keys::chat_mentions(&self.prefix, &m.chat_id),
                record_key,
            ));
        }
        self.store.remove_batch(ops).await?;

        for m in mentions {
            let remaining = self
                .store
                .zrange(&keys::user_mentions(&self.prefix, &m.mentioned_id), 0, -1)
                .await?;
            if remaining.is_empty() {
                self.store
                    .srem(&keys::mention_users(&self.prefix), &m.mentioned_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Prune a dangling index reference from a user's index.
    pub async fn prune_dangling(&self, user_id: &str, record_key: &str) -> Result<()> {
        self.store
            .zrem(&keys::user_mentions(&self.prefix, user_id), record_key)
            .await
    }

    async fn load(&self, record_key: &str) -> Result<Option<PendingMention>> {
        let Some(raw) = self.store.get(record_key).await? else {
            return Ok(None);
        };
        // Corrupt records read as absent; the sweep prunes their indexes
        Ok(serde_json::from_str(&raw).ok())
    }
}

fn users_key(prefix: &str) -> String {
    format!("{prefix}:users")
}
