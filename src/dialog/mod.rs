//! Per-room dialog state.
//!
//! A multi-turn action ("send a message to a group") stores where it
//! stands as a single [`DialogState`] per room, owned exclusively by the
//! [`DialogStateService`]. Actions read and propose transitions, but all
//! persistence goes through the service's get/set/clear contract so the
//! single-state-per-room and explicit-clearing invariants hold in one
//! place instead of at every call site.
//!
//! Writes are full replacements (last-writer-wins); there is no merge.
//! Corrupt persisted state reads as absent so a crashed run never wedges
//! a room. State older than the configured TTL also reads as absent and
//! is cleared lazily, so an abandoned flow cannot capture the user's next
//! unrelated message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::classifier::ActionId;
use crate::error::Result;
use crate::store::{keys, ConversationStore};

/// Where a multi-turn flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogStage {
    /// Flow just started
    Initial,
    /// Waiting for the user to pick a target group
    GroupSelection,
    /// Collecting the draft message text
    MessageCollection,
    /// Waiting for a yes/no on the draft
    Confirmation,
    /// User asked to revise the draft
    Editing,
    /// Terminal: flow was abandoned
    Cancelled,
}

/// Persisted per-room dialog state. At most one per room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogState {
    /// The action this flow belongs to
    pub action: ActionId,
    /// Current stage
    pub stage: DialogStage,
    /// Opaque action-defined payload (target group, draft text, prior draft)
    pub payload: Value,
    /// Last write time, used for TTL expiry
    pub updated_at: DateTime<Utc>,
}

impl DialogState {
    /// Create a fresh state at the given stage with an empty payload.
    pub fn new(action: ActionId, stage: DialogStage) -> Self {
        Self {
            action,
            stage,
            payload: Value::Null,
            updated_at: Utc::now(),
        }
    }

    /// Builder-style setter for the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Owner of all dialog state persistence.
pub struct DialogStateService {
    store: Arc<dyn ConversationStore>,
    key_prefix: String,
    /// Seconds after which state reads as absent; 0 disables expiry
    ttl_secs: u64,
}

impl DialogStateService {
    /// Create a service over the given store.
    pub fn new(store: Arc<dyn ConversationStore>, key_prefix: &str, ttl_secs: u64) -> Self {
        Self {
            store,
            key_prefix: key_prefix.to_string(),
            ttl_secs,
        }
    }

    /// Fetch the active state for a room.
    ///
    /// Returns `Ok(None)` for missing state. Malformed persisted state is
    /// treated as absent (and cleared) rather than as a fatal error, so
    /// the action can restart the flow from `Initial`. Expired state is
    /// cleared lazily and also reads as absent.
    pub async fn get(&self, room_id: &str) -> Result<Option<DialogState>> {
        let key = keys::dialog(&self.key_prefix);
        let Some(raw) = self.store.hget(&key, room_id).await? else {
            return Ok(None);
        };

        let state: DialogState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(room = %room_id, error = %e, "corrupt dialog state, treating as absent");
                self.store.hdel(&key, room_id).await?;
                return Ok(None);
            }
        };

        if self.ttl_secs > 0 {
            let age = Utc::now().signed_duration_since(state.updated_at);
            if age.num_seconds() >= self.ttl_secs as i64 {
                warn!(room = %room_id, stage = ?state.stage, "dialog state expired, clearing");
                self.store.hdel(&key, room_id).await?;
                return Ok(None);
            }
        }

        Ok(Some(state))
    }

    /// Store the state for a room, fully replacing any prior state.
    ///
    /// Stamps `updated_at` with the current time. Concurrent writers to
    /// the same room race as last-writer-wins; there is no merge.
    pub async fn set(&self, room_id: &str, mut state: DialogState) -> Result<()> {
        state.updated_at = Utc::now();
        let raw = serde_json::to_string(&state)?;
        self.store
            .hset(&keys::dialog(&self.key_prefix), room_id, &raw)
            .await
    }

    /// Remove the state for a room. Clearing an absent room is a no-op.
    pub async fn clear(&self, room_id: &str) -> Result<()> {
        self.store
            .hdel(&keys::dialog(&self.key_prefix), room_id)
            .await
    }
}
