//! Concrete actions.
//!
//! Each action implements the routing seam in `router`: a cheap
//! `validate` answering "is this message for me" and a `handle` doing
//! the work. The registry order declared in [`build_registry`] is the
//! order the fallback sweep consults them in.

pub mod fallback;
pub mod group_rules;
pub mod send_to_group;

pub use fallback::FallbackAction;
pub use group_rules::GroupRulesAction;
pub use send_to_group::SendToGroupAction;

use std::sync::Arc;

use crate::error::Result;
use crate::router::ActionRegistry;
use crate::store::{keys, ConversationStore};

/// Build the standard registry: send-to-group, then group-rules, with
/// the fallback action as the default.
pub fn build_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new(Arc::new(FallbackAction));
    registry.register(Arc::new(SendToGroupAction));
    registry.register(Arc::new(GroupRulesAction));
    registry
}

/// Phrases that abort an in-flight dialog at any stage.
pub fn is_cancel(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "cancel" | "/cancel" | "stop" | "nevermind" | "never mind"
    )
}

/// Bookkeeping of group chats the bot has seen.
///
/// Populated by the consume loop from group messages and join events;
/// read by the send-to-group flow to offer a selection list.
pub struct GroupDirectory {
    store: Arc<dyn ConversationStore>,
    prefix: String,
}

impl GroupDirectory {
    /// Create a directory over the given store.
    pub fn new(store: Arc<dyn ConversationStore>, key_prefix: &str) -> Self {
        Self {
            store,
            prefix: key_prefix.to_string(),
        }
    }

    /// Remember a group chat, refreshing its title when known.
    pub async fn record(&self, chat_id: &str, title: Option<&str>) -> Result<()> {
        self.store
            .sadd(&keys::groups(&self.prefix), chat_id)
            .await?;
        if let Some(title) = title {
            self.store
                .set(&keys::group_meta(&self.prefix, chat_id), title)
                .await?;
        }
        Ok(())
    }

    /// All known groups as `(chat_id, title)` pairs, sorted by chat ID
    /// for a stable selection list.
    pub async fn groups(&self) -> Result<Vec<(String, Option<String>)>> {
        let mut ids = self.store.smembers(&keys::groups(&self.prefix)).await?;
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let title = self.store.get(&keys::group_meta(&self.prefix, &id)).await?;
            out.push((id, title));
        }
        Ok(out)
    }

    /// Resolve a user's selection (title or raw chat ID) to a chat ID.
    pub async fn resolve(&self, selection: &str) -> Result<Option<(String, Option<String>)>> {
        let wanted = selection.trim();
        for (id, title) in self.groups().await? {
            if id == wanted || title.as_deref() == Some(wanted) {
                return Ok(Some((id, title)));
            }
        }
        Ok(None)
    }
}
