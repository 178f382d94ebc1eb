//! Default action: handles everything nobody else wanted.
//!
//! In private chats it replies with a short usage hint. In group chats
//! it is an explicit no-op; answering every piece of group chatter the
//! classifier could not place would make the bot unbearable.

use async_trait::async_trait;
use tracing::debug;

use crate::bus::ChatKind;
use crate::classifier::ActionId;
use crate::error::Result;
use crate::router::{Action, ActionContext};

const FALLBACK_REPLY: &str =
    "I'm not sure what you'd like me to do. I can relay messages to your \
     groups or show group rules.";

pub struct FallbackAction;

#[async_trait]
impl Action for FallbackAction {
    fn id(&self) -> ActionId {
        ActionId::Fallback
    }

    fn description(&self) -> &str {
        "generic reply when no other action applies"
    }

    // Accepts everything so the router always has a last resort
    async fn validate(&self, _ctx: &ActionContext) -> Result<bool> {
        Ok(true)
    }

    async fn handle(&self, ctx: &ActionContext) -> Result<()> {
        if ctx.message.chat_kind == ChatKind::Group {
            debug!(chat = %ctx.message.chat_id, "unrouted group message, staying quiet");
            return Ok(());
        }
        ctx.reply(FALLBACK_REPLY).await
    }
}
