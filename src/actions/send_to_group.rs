//! Send-to-group action: a multi-step dialog that collects a target
//! group and a message, confirms, and relays it.
//!
//! Stage machine: group selection, message collection, confirmation,
//! and an optional editing loop that keeps the previous draft around
//! for reference. Every stage accepts a cancel phrase. Confirm and
//! cancel both end the dialog by clearing the room's state; the next
//! message routes fresh.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::actions::{is_cancel, GroupDirectory};
use crate::bus::{ChatKind, OutboundMessage};
use crate::classifier::ActionId;
use crate::dialog::{DialogStage, DialogState};
use crate::error::{Result, WardenError};
use crate::router::{payload_str, Action, ActionContext};

const CONFIRM_KEYBOARD: [&str; 3] = ["Yes", "No", "Edit"];

pub struct SendToGroupAction;

impl SendToGroupAction {
    fn directory(ctx: &ActionContext) -> GroupDirectory {
        GroupDirectory::new(
            ctx.services.store.clone(),
            &ctx.services.key_prefix,
        )
    }

    fn label(group_id: &str, title: Option<&str>) -> String {
        title.unwrap_or(group_id).to_string()
    }

    async fn begin(&self, ctx: &ActionContext) -> Result<()> {
        let groups = Self::directory(ctx).groups().await?;
        if groups.is_empty() {
            return ctx
                .reply("I don't know any groups yet. Add me to a group first.")
                .await;
        }

        let mut keyboard: Vec<Vec<String>> = groups
            .iter()
            .map(|(id, title)| vec![Self::label(id, title.as_deref())])
            .collect();
        keyboard.push(vec!["Cancel".to_string()]);

        ctx.services
            .dialogs
            .set(
                &ctx.message.chat_id,
                DialogState::new(ActionId::SendToGroup, DialogStage::GroupSelection),
            )
            .await?;
        ctx.reply_with_keyboard("Which group should I send to?", keyboard)
            .await
    }

    async fn cancel(&self, ctx: &ActionContext) -> Result<()> {
        ctx.services.dialogs.clear(&ctx.message.chat_id).await?;
        ctx.reply("Cancelled.").await
    }

    async fn resume(&self, ctx: &ActionContext, mut state: DialogState) -> Result<()> {
        let content = ctx.message.content.trim();
        if is_cancel(content) {
            return self.cancel(ctx).await;
        }

        match state.stage {
            DialogStage::GroupSelection => {
                let Some((group_id, title)) = Self::directory(ctx).resolve(content).await? else {
                    return ctx
                        .reply("I don't know that group. Pick one from the keyboard, or say cancel.")
                        .await;
                };
                let label = Self::label(&group_id, title.as_deref());
                state.stage = DialogStage::MessageCollection;
                state.payload = json!({ "group_id": group_id, "group_title": title });
                ctx.services.dialogs.set(&ctx.message.chat_id, state).await?;
                ctx.reply(&format!("What should I send to {}?", label)).await
            }

            DialogStage::MessageCollection => {
                let label = Self::label(
                    payload_str(&state.payload, "group_id").unwrap_or("the group"),
                    payload_str(&state.payload, "group_title"),
                );
                state.payload["draft"] = json!(content);
                state.stage = DialogStage::Confirmation;
                ctx.services
                    .dialogs
                    .set(&ctx.message.chat_id, state)
                    .await?;
                ctx.reply_with_keyboard(
                    &format!("Send this to {}?\n\n{}", label, content),
                    vec![CONFIRM_KEYBOARD.iter().map(|s| s.to_string()).collect()],
                )
                .await
            }

            DialogStage::Confirmation => match content.to_lowercase().as_str() {
                "yes" | "send" | "confirm" => self.deliver(ctx, &state).await,
                "no" => self.cancel(ctx).await,
                "edit" => {
                    let draft = payload_str(&state.payload, "draft").unwrap_or("").to_string();
                    state.payload["previous_draft"] = json!(draft);
                    state.stage = DialogStage::Editing;
                    ctx.services
                        .dialogs
                        .set(&ctx.message.chat_id, state)
                        .await?;
                    ctx.reply(&format!(
                        "Send me the new text. For reference, the previous draft was:\n\n{}",
                        draft
                    ))
                    .await
                }
                _ => {
                    ctx.reply_with_keyboard(
                        "Please answer Yes, No, or Edit.",
                        vec![CONFIRM_KEYBOARD.iter().map(|s| s.to_string()).collect()],
                    )
                    .await
                }
            },

            DialogStage::Editing => {
                let label = Self::label(
                    payload_str(&state.payload, "group_id").unwrap_or("the group"),
                    payload_str(&state.payload, "group_title"),
                );
                state.payload["draft"] = json!(content);
                state.stage = DialogStage::Confirmation;
                ctx.services
                    .dialogs
                    .set(&ctx.message.chat_id, state)
                    .await?;
                ctx.reply_with_keyboard(
                    &format!("Send this to {}?\n\n{}", label, content),
                    vec![CONFIRM_KEYBOARD.iter().map(|s| s.to_string()).collect()],
                )
                .await
            }

            // A stale marker stage restarts the flow from scratch
            DialogStage::Initial | DialogStage::Cancelled => {
                debug!(chat = %ctx.message.chat_id, stage = ?state.stage, "restarting send flow");
                self.begin(ctx).await
            }
        }
    }

    async fn deliver(&self, ctx: &ActionContext, state: &DialogState) -> Result<()> {
        let group_id = payload_str(&state.payload, "group_id")
            .ok_or_else(|| WardenError::Action("confirmation reached without a target group".into()))?;
        let draft = payload_str(&state.payload, "draft")
            .ok_or_else(|| WardenError::Action("confirmation reached without a draft".into()))?;

        ctx.services
            .transport
            .send_message(OutboundMessage::new(group_id, draft))
            .await?;
        info!(group = %group_id, "relayed message to group");

        ctx.services.dialogs.clear(&ctx.message.chat_id).await?;
        ctx.reply("Sent.").await
    }
}

#[async_trait]
impl Action for SendToGroupAction {
    fn id(&self) -> ActionId {
        ActionId::SendToGroup
    }

    fn description(&self) -> &str {
        "relay a message from the user to one of the bot's group chats"
    }

    fn trigger_hints(&self) -> &[&str] {
        &[
            "\"send a message to the dev group\"",
            "\"post the schedule in ops\"",
            "\"tell the group the meeting moved\"",
        ]
    }

    async fn validate(&self, ctx: &ActionContext) -> Result<bool> {
        if ctx.message.chat_kind != ChatKind::Private {
            return Ok(false);
        }
        let text = ctx.message.content.to_lowercase();
        let verb = ["send", "post", "announce", "tell", "relay", "forward", "share"]
            .iter()
            .any(|v| text.contains(v));
        let target = ["group", "chat", "channel", "team", "everyone"]
            .iter()
            .any(|t| text.contains(t));
        Ok(verb && target)
    }

    async fn handle(&self, ctx: &ActionContext) -> Result<()> {
        match ctx.services.dialogs.get(&ctx.message.chat_id).await? {
            Some(state) if state.action == ActionId::SendToGroup => self.resume(ctx, state).await,
            _ => self.begin(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InboundMessage;
    use crate::dialog::DialogStateService;
    use crate::router::Services;
    use crate::store::{ConversationStore, MemoryStore};
    use crate::transport::{ChatTransport, MockChatTransport};
    use std::sync::{Arc, Mutex};

    struct Harness {
        services: Services,
        sent: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    fn harness() -> Harness {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_clone = Arc::clone(&sent);
        let mut transport = MockChatTransport::new();
        transport.expect_send_message().returning(move |m| {
            sent_clone.lock().unwrap().push(m);
            Ok(())
        });
        let transport: Arc<dyn ChatTransport> = Arc::new(transport);
        Harness {
            services: Services {
                dialogs: Arc::new(DialogStateService::new(Arc::clone(&store), "gw", 0)),
                store,
                transport,
                key_prefix: "gw".into(),
            },
            sent,
        }
    }

    fn ctx(h: &Harness, content: &str) -> ActionContext {
        ActionContext {
            message: InboundMessage::new("u1", "dm1", "1", content, ChatKind::Private),
            services: h.services.clone(),
        }
    }

    async fn seed_group(h: &Harness) {
        GroupDirectory::new(h.services.store.clone(), "gw")
            .record("-100", Some("Dev"))
            .await
            .unwrap();
    }

    fn last_sent(h: &Harness) -> OutboundMessage {
        h.sent.lock().unwrap().last().unwrap().clone()
    }

    #[tokio::test]
    async fn test_validate_requires_private_chat() {
        let h = harness();
        let action = SendToGroupAction;

        let mut group_msg = ctx(&h, "send the schedule to the group");
        group_msg.message.chat_kind = ChatKind::Group;
        assert!(!action.validate(&group_msg).await.unwrap());

        assert!(action
            .validate(&ctx(&h, "send the schedule to the group"))
            .await
            .unwrap());
        assert!(!action.validate(&ctx(&h, "what are the rules?")).await.unwrap());
    }

    #[tokio::test]
    async fn test_begin_with_no_groups() {
        let h = harness();
        SendToGroupAction.handle(&ctx(&h, "send something to the group")).await.unwrap();

        assert!(last_sent(&h).content.contains("don't know any groups"));
        // No dialog started
        assert!(h.services.dialogs.get("dm1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_flow_confirm() {
        let h = harness();
        seed_group(&h).await;
        let action = SendToGroupAction;

        action.handle(&ctx(&h, "send something to the group")).await.unwrap();
        let prompt = last_sent(&h);
        assert!(prompt.content.contains("Which group"));
        assert!(prompt.keyboard.is_some());

        action.handle(&ctx(&h, "Dev")).await.unwrap();
        assert!(last_sent(&h).content.contains("What should I send to Dev?"));

        action.handle(&ctx(&h, "standup moved to 11:00")).await.unwrap();
        assert!(last_sent(&h).content.contains("standup moved to 11:00"));

        action.handle(&ctx(&h, "yes")).await.unwrap();

        let sent = h.sent.lock().unwrap();
        // Second to last is the relayed group message, last is the ack
        let relayed = &sent[sent.len() - 2];
        assert_eq!(relayed.chat_id, "-100");
        assert_eq!(relayed.content, "standup moved to 11:00");
        assert_eq!(sent.last().unwrap().content, "Sent.");
        drop(sent);

        assert!(h.services.dialogs.get("dm1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_group_reprompts() {
        let h = harness();
        seed_group(&h).await;
        let action = SendToGroupAction;

        action.handle(&ctx(&h, "post to a group")).await.unwrap();
        action.handle(&ctx(&h, "Marketing")).await.unwrap();

        assert!(last_sent(&h).content.contains("don't know that group"));
        // Still waiting at the same stage
        let state = h.services.dialogs.get("dm1").await.unwrap().unwrap();
        assert_eq!(state.stage, DialogStage::GroupSelection);
    }

    #[tokio::test]
    async fn test_cancel_mid_flow() {
        let h = harness();
        seed_group(&h).await;
        let action = SendToGroupAction;

        action.handle(&ctx(&h, "post to a group")).await.unwrap();
        action.handle(&ctx(&h, "Dev")).await.unwrap();
        action.handle(&ctx(&h, "cancel")).await.unwrap();

        assert_eq!(last_sent(&h).content, "Cancelled.");
        assert!(h.services.dialogs.get("dm1").await.unwrap().is_none());
        // Nothing reached the group
        assert!(h.sent.lock().unwrap().iter().all(|m| m.chat_id != "-100"));
    }

    #[tokio::test]
    async fn test_edit_keeps_previous_draft() {
        let h = harness();
        seed_group(&h).await;
        let action = SendToGroupAction;

        action.handle(&ctx(&h, "post to a group")).await.unwrap();
        action.handle(&ctx(&h, "Dev")).await.unwrap();
        action.handle(&ctx(&h, "first draft")).await.unwrap();
        action.handle(&ctx(&h, "edit")).await.unwrap();

        assert!(last_sent(&h).content.contains("first draft"));
        let state = h.services.dialogs.get("dm1").await.unwrap().unwrap();
        assert_eq!(state.stage, DialogStage::Editing);
        assert_eq!(payload_str(&state.payload, "previous_draft"), Some("first draft"));

        action.handle(&ctx(&h, "second draft")).await.unwrap();
        action.handle(&ctx(&h, "yes")).await.unwrap();

        let sent = h.sent.lock().unwrap();
        let relayed = &sent[sent.len() - 2];
        assert_eq!(relayed.content, "second draft");
    }

    #[tokio::test]
    async fn test_confirmation_rejects_other_answers() {
        let h = harness();
        seed_group(&h).await;
        let action = SendToGroupAction;

        action.handle(&ctx(&h, "post to a group")).await.unwrap();
        action.handle(&ctx(&h, "Dev")).await.unwrap();
        action.handle(&ctx(&h, "the draft")).await.unwrap();
        action.handle(&ctx(&h, "maybe later")).await.unwrap();

        assert!(last_sent(&h).content.contains("Yes, No, or Edit"));
        let state = h.services.dialogs.get("dm1").await.unwrap().unwrap();
        assert_eq!(state.stage, DialogStage::Confirmation);
    }
}
