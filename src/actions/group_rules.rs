//! Group rules: per-chat rules text, served on request and shown to
//! joining members.
//!
//! When a greeting cannot be sent because the bot lost posting rights
//! in the chat, the bot leaves it. That room is finished; no retry.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::bus::{ChatKind, MemberJoined, OutboundMessage};
use crate::classifier::ActionId;
use crate::error::{Result, WardenError};
use crate::router::{Action, ActionContext, Services};
use crate::store::keys;

const SET_PREFIX: &str = "set rules:";

pub struct GroupRulesAction;

impl GroupRulesAction {
    async fn show_rules(&self, ctx: &ActionContext) -> Result<()> {
        let key = keys::rules(&ctx.services.key_prefix, &ctx.message.chat_id);
        match ctx.services.store.get(&key).await? {
            Some(rules) => ctx.reply(&rules).await,
            None => {
                ctx.reply("No rules set for this group yet. An admin can say \"set rules: ...\".")
                    .await
            }
        }
    }

    async fn set_rules(&self, ctx: &ActionContext, rules: &str) -> Result<()> {
        let rules = rules.trim();
        if rules.is_empty() {
            return ctx.reply("The rules text is empty. Say \"set rules: <text>\".").await;
        }
        let key = keys::rules(&ctx.services.key_prefix, &ctx.message.chat_id);
        ctx.services.store.set(&key, rules).await?;
        info!(chat = %ctx.message.chat_id, "group rules updated");
        ctx.reply("Rules updated.").await
    }
}

#[async_trait]
impl Action for GroupRulesAction {
    fn id(&self) -> ActionId {
        ActionId::GroupRules
    }

    fn description(&self) -> &str {
        "show or update the rules of a group chat"
    }

    fn trigger_hints(&self) -> &[&str] {
        &["\"what are the rules\"", "\"show group rules\"", "\"set rules: be kind\""]
    }

    async fn validate(&self, ctx: &ActionContext) -> Result<bool> {
        if ctx.message.chat_kind != ChatKind::Group {
            return Ok(false);
        }
        Ok(ctx.message.content.to_lowercase().contains("rules"))
    }

    async fn handle(&self, ctx: &ActionContext) -> Result<()> {
        if ctx.message.chat_kind != ChatKind::Group {
            return ctx
                .reply("Rules live in group chats. Ask me there.")
                .await;
        }
        let lower = ctx.message.content.to_lowercase();
        if let Some(pos) = lower.find(SET_PREFIX) {
            let rules = &ctx.message.content[pos + SET_PREFIX.len()..];
            return self.set_rules(ctx, rules).await;
        }
        self.show_rules(ctx).await
    }

    /// Greet a joining member with the group's rules.
    ///
    /// If the bot can no longer post in the chat it leaves instead of
    /// retrying; a chat the bot cannot speak in is not worth tracking.
    async fn on_member_joined(&self, event: &MemberJoined, services: &Services) -> Result<()> {
        let rules = services
            .store
            .get(&keys::rules(&services.key_prefix, &event.chat_id))
            .await?;

        let who = event
            .username
            .as_deref()
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| "Welcome".to_string());
        let greeting = match rules {
            Some(rules) => format!("Welcome, {who}! Please read the group rules:\n\n{rules}"),
            None => format!("Welcome, {who}!"),
        };

        match services
            .transport
            .send_message(OutboundMessage::new(&event.chat_id, &greeting))
            .await
        {
            Ok(()) => Ok(()),
            Err(WardenError::TransportForbidden(reason)) => {
                warn!(chat = %event.chat_id, "cannot post in chat ({}), leaving", reason);
                services.transport.leave_chat(&event.chat_id).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InboundMessage;
    use crate::dialog::DialogStateService;
    use crate::store::{ConversationStore, MemoryStore};
    use crate::transport::{ChatTransport, MockChatTransport};
    use std::sync::{Arc, Mutex};

    fn services_with(transport: Arc<dyn ChatTransport>) -> Services {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        Services {
            dialogs: Arc::new(DialogStateService::new(Arc::clone(&store), "gw", 0)),
            store,
            transport,
            key_prefix: "gw".into(),
        }
    }

    fn recording_transport() -> (Arc<dyn ChatTransport>, Arc<Mutex<Vec<OutboundMessage>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_clone = Arc::clone(&sent);
        let mut transport = MockChatTransport::new();
        transport.expect_send_message().returning(move |m| {
            sent_clone.lock().unwrap().push(m);
            Ok(())
        });
        (Arc::new(transport), sent)
    }

    fn group_ctx(services: &Services, content: &str) -> ActionContext {
        ActionContext {
            message: InboundMessage::new("u1", "-100", "1", content, ChatKind::Group),
            services: services.clone(),
        }
    }

    #[tokio::test]
    async fn test_validate_group_only() {
        let (transport, _) = recording_transport();
        let services = services_with(transport);
        let action = GroupRulesAction;

        assert!(action
            .validate(&group_ctx(&services, "what are the rules?"))
            .await
            .unwrap());
        assert!(!action
            .validate(&group_ctx(&services, "hello there"))
            .await
            .unwrap());

        let mut private = group_ctx(&services, "what are the rules?");
        private.message.chat_kind = ChatKind::Private;
        assert!(!action.validate(&private).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_then_show_rules() {
        let (transport, sent) = recording_transport();
        let services = services_with(transport);
        let action = GroupRulesAction;

        action
            .handle(&group_ctx(&services, "Set rules: no spam, be kind"))
            .await
            .unwrap();
        assert_eq!(sent.lock().unwrap().last().unwrap().content, "Rules updated.");

        action
            .handle(&group_ctx(&services, "what are the rules?"))
            .await
            .unwrap();
        assert_eq!(
            sent.lock().unwrap().last().unwrap().content,
            "no spam, be kind"
        );
    }

    #[tokio::test]
    async fn test_show_rules_unset() {
        let (transport, sent) = recording_transport();
        let services = services_with(transport);

        GroupRulesAction
            .handle(&group_ctx(&services, "rules please"))
            .await
            .unwrap();
        assert!(sent
            .lock()
            .unwrap()
            .last()
            .unwrap()
            .content
            .contains("No rules set"));
    }

    #[tokio::test]
    async fn test_greeting_includes_rules() {
        let (transport, sent) = recording_transport();
        let services = services_with(transport);
        services
            .store
            .set(&keys::rules("gw", "-100"), "no spam")
            .await
            .unwrap();

        let event = MemberJoined {
            chat_id: "-100".into(),
            chat_title: Some("Dev".into()),
            user_id: "u9".into(),
            username: Some("newbie".into()),
        };
        GroupRulesAction
            .on_member_joined(&event, &services)
            .await
            .unwrap();

        let greeting = sent.lock().unwrap().last().unwrap().clone();
        assert_eq!(greeting.chat_id, "-100");
        assert!(greeting.content.contains("@newbie"));
        assert!(greeting.content.contains("no spam"));
    }

    #[tokio::test]
    async fn test_forbidden_greeting_leaves_chat() {
        let left = Arc::new(Mutex::new(Vec::new()));
        let left_clone = Arc::clone(&left);
        let mut transport = MockChatTransport::new();
        transport
            .expect_send_message()
            .returning(|_| Err(WardenError::TransportForbidden("kicked".into())));
        transport.expect_leave_chat().returning(move |chat_id| {
            left_clone.lock().unwrap().push(chat_id.to_string());
            Ok(())
        });
        let services = services_with(Arc::new(transport));

        let event = MemberJoined {
            chat_id: "-100".into(),
            chat_title: None,
            user_id: "u9".into(),
            username: None,
        };
        GroupRulesAction
            .on_member_joined(&event, &services)
            .await
            .unwrap();

        assert_eq!(left.lock().unwrap().as_slice(), ["-100"]);
    }
}
