//! Message routing.
//!
//! Every inbound message is routed in at most three stages. If the room
//! has an active dialog, the owning action resumes it directly and no
//! classification happens. Otherwise the classifier is asked once to
//! nominate a single action with a confidence score; a nomination wins
//! only when its confidence is strictly above the configured threshold
//! and the action's own `validate` agrees. Failing that, every action is
//! offered the message in declared order, and the default action picks
//! up whatever nobody wanted. A failure anywhere in the pipeline is
//! caught at the top: it is logged, and the user gets a generic apology
//! rather than silence or a stack trace.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bus::{InboundMessage, MemberJoined, OutboundMessage};
use crate::classifier::{parse_intent, ActionId, IntentClassifier, IntentGuess};
use crate::config::ClassifierConfig;
use crate::dialog::DialogStateService;
use crate::error::Result;
use crate::store::ConversationStore;
use crate::transport::ChatTransport;

/// Reply sent when routing fails outright.
pub const GENERIC_APOLOGY: &str =
    "Sorry, something went wrong handling that. Please try again.";

/// Shared handles every action needs.
#[derive(Clone)]
pub struct Services {
    /// Per-room dialog state
    pub dialogs: Arc<DialogStateService>,
    /// Backing store for action bookkeeping
    pub store: Arc<dyn ConversationStore>,
    /// Outbound side of the chat transport
    pub transport: Arc<dyn ChatTransport>,
    /// Namespace prefix for store keys
    pub key_prefix: String,
}

/// Context handed to an action for one message.
#[derive(Clone)]
pub struct ActionContext {
    /// The message being routed
    pub message: InboundMessage,
    /// Shared service handles
    pub services: Services,
}

impl ActionContext {
    /// Send a plain text reply to the message's chat.
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.services
            .transport
            .send_message(OutboundMessage::new(&self.message.chat_id, text))
            .await
    }

    /// Send a reply with a one-time keyboard.
    pub async fn reply_with_keyboard(
        &self,
        text: &str,
        keyboard: Vec<Vec<String>>,
    ) -> Result<()> {
        self.services
            .transport
            .send_message(OutboundMessage::with_keyboard(
                &self.message.chat_id,
                text,
                keyboard,
            ))
            .await
    }
}

/// Trait that all routable actions implement.
///
/// `validate` answers "is this message for me" cheaply and without side
/// effects; `handle` does the work. The same action may be reached via
/// classifier nomination, the fallback sweep, or a dialog continuation,
/// and must behave identically in all three cases.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable identifier, used in dialog state and classifier output.
    fn id(&self) -> ActionId;

    /// One-line description shown to the classifier.
    fn description(&self) -> &str;

    /// Example phrasings that should route here. Shown to the classifier.
    fn trigger_hints(&self) -> &[&str] {
        &[]
    }

    /// Whether this action wants the message. Must not mutate state.
    async fn validate(&self, ctx: &ActionContext) -> Result<bool>;

    /// Handle the message, including resuming an in-flight dialog.
    async fn handle(&self, ctx: &ActionContext) -> Result<()>;

    /// Called for every member-joined event. Default is a no-op.
    async fn on_member_joined(&self, _event: &MemberJoined, _services: &Services) -> Result<()> {
        Ok(())
    }
}

/// Holds actions in their declared order plus the default action.
///
/// Declared order matters: the fallback sweep offers the message to
/// actions in exactly the order they were registered.
pub struct ActionRegistry {
    actions: Vec<Arc<dyn Action>>,
    default_action: Arc<dyn Action>,
}

impl ActionRegistry {
    /// Create a registry with the given default action.
    pub fn new(default_action: Arc<dyn Action>) -> Self {
        Self {
            actions: Vec::new(),
            default_action,
        }
    }

    /// Register an action at the end of the declared order.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        info!(action = %action.id(), "Registering action");
        self.actions.push(action);
    }

    /// Look up an action by identifier. The default action is findable too.
    pub fn get(&self, id: ActionId) -> Option<&Arc<dyn Action>> {
        if self.default_action.id() == id {
            return Some(&self.default_action);
        }
        self.actions.iter().find(|a| a.id() == id)
    }

    /// Actions in declared order, default excluded.
    pub fn actions(&self) -> impl Iterator<Item = &Arc<dyn Action>> {
        self.actions.iter()
    }

    /// The action that handles everything nobody else wanted.
    pub fn default_action(&self) -> &Arc<dyn Action> {
        &self.default_action
    }

    /// Render the action catalogue for the classifier prompt.
    pub fn catalogue(&self) -> String {
        let mut out = String::new();
        for action in &self.actions {
            out.push_str(&format!("- {}: {}", action.id(), action.description()));
            let hints = action.trigger_hints();
            if !hints.is_empty() {
                out.push_str(&format!(" (e.g. {})", hints.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

/// How a message ended up being handled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoutingDecision {
    /// An active dialog resumed in the owning action
    Continued(ActionId),
    /// The classifier's nominee accepted the message
    Classified {
        /// Winning action
        action: ActionId,
        /// Reported confidence
        confidence: f64,
    },
    /// The fallback sweep found a taker
    Fallback(ActionId),
    /// Nobody wanted it; the default action replied
    Defaulted,
    /// Routing failed and the user got an apology
    Failed,
}

/// Routes inbound messages to actions.
pub struct MessageRouter {
    registry: ActionRegistry,
    classifier: Arc<dyn IntentClassifier>,
    services: Services,
    config: ClassifierConfig,
}

impl MessageRouter {
    /// Create a router over a registry and classifier.
    pub fn new(
        registry: ActionRegistry,
        classifier: Arc<dyn IntentClassifier>,
        services: Services,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            registry,
            classifier,
            services,
            config,
        }
    }

    /// Route one message, absorbing any failure.
    ///
    /// This is the only entry point the consume loop uses. Errors from
    /// any stage are logged and answered with a generic apology; the
    /// loop itself never sees them.
    pub async fn dispatch(&self, msg: InboundMessage) -> RoutingDecision {
        let chat_id = msg.chat_id.clone();
        match self.route(msg).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(chat = %chat_id, "Routing failed: {}", e);
                let apology = OutboundMessage::new(&chat_id, GENERIC_APOLOGY);
                if let Err(send_err) = self.services.transport.send_message(apology).await {
                    warn!(chat = %chat_id, "Could not deliver apology: {}", send_err);
                }
                RoutingDecision::Failed
            }
        }
    }

    /// Fan a member-joined event out to every action.
    ///
    /// One action failing does not stop the others from seeing the event.
    pub async fn dispatch_member_joined(&self, event: &MemberJoined) {
        for action in self
            .registry
            .actions()
            .chain(std::iter::once(self.registry.default_action()))
        {
            if let Err(e) = action.on_member_joined(event, &self.services).await {
                warn!(
                    action = %action.id(),
                    chat = %event.chat_id,
                    "member-joined hook failed: {}", e
                );
            }
        }
    }

    async fn route(&self, msg: InboundMessage) -> Result<RoutingDecision> {
        let ctx = ActionContext {
            message: msg,
            services: self.services.clone(),
        };

        // Stage 0: an active dialog owns the room until it ends
        if let Some(state) = self.services.dialogs.get(&ctx.message.chat_id).await? {
            if let Some(action) = self.registry.get(state.action) {
                debug!(
                    chat = %ctx.message.chat_id,
                    action = %state.action,
                    stage = ?state.stage,
                    "resuming dialog"
                );
                action.handle(&ctx).await?;
                return Ok(RoutingDecision::Continued(state.action));
            }
            // State points at an action that no longer exists
            warn!(chat = %ctx.message.chat_id, action = %state.action, "orphaned dialog state, clearing");
            self.services.dialogs.clear(&ctx.message.chat_id).await?;
        }

        // Stage 1: one classifier call, one nominee
        if let Some(guess) = self.classify(&ctx.message.content).await {
            if guess.confidence > self.config.confidence_threshold {
                if let Some(action) = self.registry.get(guess.action) {
                    if action.validate(&ctx).await? {
                        debug!(
                            action = %guess.action,
                            confidence = guess.confidence,
                            "classifier nomination accepted"
                        );
                        action.handle(&ctx).await?;
                        return Ok(RoutingDecision::Classified {
                            action: guess.action,
                            confidence: guess.confidence,
                        });
                    }
                    debug!(action = %guess.action, "nominee declined the message");
                }
            } else {
                debug!(
                    action = %guess.action,
                    confidence = guess.confidence,
                    threshold = self.config.confidence_threshold,
                    "nomination below threshold"
                );
            }
        }

        // Stage 2: offer the message to every action in declared order
        for action in self.registry.actions() {
            if action.validate(&ctx).await? {
                debug!(action = %action.id(), "fallback sweep matched");
                action.handle(&ctx).await?;
                return Ok(RoutingDecision::Fallback(action.id()));
            }
        }

        // Stage 3: the default action never declines
        self.registry.default_action().handle(&ctx).await?;
        Ok(RoutingDecision::Defaulted)
    }

    /// Call the classifier once and parse its nomination.
    ///
    /// An unreachable classifier or unparsable output both read as "no
    /// nomination" so the fallback sweep still runs.
    async fn classify(&self, content: &str) -> Option<IntentGuess> {
        let prompt = build_prompt(&self.registry, content);
        match self.classifier.classify(&prompt, &self.config.model).await {
            Ok(raw) => {
                let guess = parse_intent(&raw);
                if guess.is_none() {
                    debug!(raw = %raw, "classifier output had no usable nomination");
                }
                guess
            }
            Err(e) => {
                warn!("Classifier unavailable, falling back to sweep: {}", e);
                None
            }
        }
    }
}

/// Build the single classification prompt: catalogue plus message.
fn build_prompt(registry: &ActionRegistry, content: &str) -> String {
    format!(
        "You route chat messages for a group assistant bot. Pick the one \
         action that best matches the message below.\n\n\
         Actions:\n{}\n\
         Reply with strict JSON only, no prose:\n\
         {{\"action\": \"<action name>\", \"confidence\": <0.0 to 1.0>}}\n\
         If nothing fits, use {{\"action\": \"fallback\", \"confidence\": 0.0}}.\n\n\
         Message: {}",
        registry.catalogue(),
        content
    )
}

/// Payload helper: actions keep their dialog scratch data as JSON.
pub fn payload_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChatKind;
    use crate::classifier::MockIntentClassifier;
    use crate::dialog::{DialogStage, DialogState};
    use crate::error::WardenError;
    use crate::store::MemoryStore;
    use crate::transport::MockChatTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test double with scripted validate result and a handle counter.
    struct ScriptedAction {
        id: ActionId,
        accepts: bool,
        fail_handle: bool,
        handled: AtomicUsize,
    }

    impl ScriptedAction {
        fn new(id: ActionId, accepts: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                accepts,
                fail_handle: false,
                handled: AtomicUsize::new(0),
            })
        }

        fn failing(id: ActionId) -> Arc<Self> {
            Arc::new(Self {
                id,
                accepts: true,
                fail_handle: true,
                handled: AtomicUsize::new(0),
            })
        }

        fn handled(&self) -> usize {
            self.handled.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Action for ScriptedAction {
        fn id(&self) -> ActionId {
            self.id
        }

        fn description(&self) -> &str {
            "scripted"
        }

        async fn validate(&self, _ctx: &ActionContext) -> Result<bool> {
            Ok(self.accepts)
        }

        async fn handle(&self, _ctx: &ActionContext) -> Result<()> {
            if self.fail_handle {
                return Err(WardenError::Action("scripted failure".into()));
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn services(transport: Arc<dyn ChatTransport>) -> Services {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        Services {
            dialogs: Arc::new(DialogStateService::new(Arc::clone(&store), "gw", 0)),
            store,
            transport,
            key_prefix: "gw".into(),
        }
    }

    fn silent_transport() -> Arc<dyn ChatTransport> {
        let mut t = MockChatTransport::new();
        t.expect_send_message().returning(|_| Ok(()));
        Arc::new(t)
    }

    fn classifier_returning(raw: &str) -> Arc<dyn IntentClassifier> {
        let raw = raw.to_string();
        let mut c = MockIntentClassifier::new();
        c.expect_classify().returning(move |_, _| Ok(raw.clone()));
        Arc::new(c)
    }

    fn msg() -> InboundMessage {
        InboundMessage::new("u1", "c1", "1", "post the schedule to the dev group", ChatKind::Private)
    }

    #[tokio::test]
    async fn test_confident_nomination_wins() {
        let target = ScriptedAction::new(ActionId::SendToGroup, true);
        let other = ScriptedAction::new(ActionId::GroupRules, true);
        let fallback = ScriptedAction::new(ActionId::Fallback, true);

        let mut registry = ActionRegistry::new(fallback.clone());
        registry.register(other.clone());
        registry.register(target.clone());

        let router = MessageRouter::new(
            registry,
            classifier_returning(r#"{"action": "send_to_group", "confidence": 0.9}"#),
            services(silent_transport()),
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        assert_eq!(
            decision,
            RoutingDecision::Classified {
                action: ActionId::SendToGroup,
                confidence: 0.9
            }
        );
        assert_eq!(target.handled(), 1);
        // The sweep never ran even though an earlier action accepts
        assert_eq!(other.handled(), 0);
    }

    #[tokio::test]
    async fn test_confidence_at_threshold_is_rejected() {
        // 0.5 is not strictly greater than 0.5
        let target = ScriptedAction::new(ActionId::SendToGroup, true);
        let fallback = ScriptedAction::new(ActionId::Fallback, true);

        let mut registry = ActionRegistry::new(fallback.clone());
        registry.register(target.clone());

        let router = MessageRouter::new(
            registry,
            classifier_returning(r#"{"action": "send_to_group", "confidence": 0.5}"#),
            services(silent_transport()),
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        // The sweep still reaches the same action, but via validation
        assert_eq!(decision, RoutingDecision::Fallback(ActionId::SendToGroup));
    }

    #[tokio::test]
    async fn test_classifier_error_falls_back_to_sweep() {
        let taker = ScriptedAction::new(ActionId::GroupRules, true);
        let fallback = ScriptedAction::new(ActionId::Fallback, true);

        let mut registry = ActionRegistry::new(fallback.clone());
        registry.register(taker.clone());

        let mut classifier = MockIntentClassifier::new();
        classifier
            .expect_classify()
            .returning(|_, _| Err(WardenError::Classifier("timeout".into())));

        let router = MessageRouter::new(
            registry,
            Arc::new(classifier),
            services(silent_transport()),
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        assert_eq!(decision, RoutingDecision::Fallback(ActionId::GroupRules));
        assert_eq!(taker.handled(), 1);
    }

    #[tokio::test]
    async fn test_unparsable_output_falls_back() {
        let fallback = ScriptedAction::new(ActionId::Fallback, true);
        let decliner = ScriptedAction::new(ActionId::GroupRules, false);

        let mut registry = ActionRegistry::new(fallback.clone());
        registry.register(decliner.clone());

        let router = MessageRouter::new(
            registry,
            classifier_returning("I think this is probably about rules?"),
            services(silent_transport()),
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        assert_eq!(decision, RoutingDecision::Defaulted);
        assert_eq!(fallback.handled(), 1);
    }

    #[tokio::test]
    async fn test_sweep_respects_declared_order() {
        let first = ScriptedAction::new(ActionId::GroupRules, true);
        let second = ScriptedAction::new(ActionId::SendToGroup, true);
        let fallback = ScriptedAction::new(ActionId::Fallback, true);

        let mut registry = ActionRegistry::new(fallback.clone());
        registry.register(first.clone());
        registry.register(second.clone());

        let router = MessageRouter::new(
            registry,
            classifier_returning("{}"),
            services(silent_transport()),
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        assert_eq!(decision, RoutingDecision::Fallback(ActionId::GroupRules));
        assert_eq!(first.handled(), 1);
        assert_eq!(second.handled(), 0);
    }

    #[tokio::test]
    async fn test_dialog_continuation_skips_classifier() {
        let owner = ScriptedAction::new(ActionId::SendToGroup, false);
        let fallback = ScriptedAction::new(ActionId::Fallback, true);

        let mut registry = ActionRegistry::new(fallback.clone());
        registry.register(owner.clone());

        let mut classifier = MockIntentClassifier::new();
        classifier.expect_classify().never();

        let svcs = services(silent_transport());
        svcs.dialogs
            .set(
                "c1",
                DialogState::new(ActionId::SendToGroup, DialogStage::MessageCollection),
            )
            .await
            .unwrap();

        let router = MessageRouter::new(
            registry,
            Arc::new(classifier),
            svcs,
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        assert_eq!(decision, RoutingDecision::Continued(ActionId::SendToGroup));
        assert_eq!(owner.handled(), 1);
    }

    #[tokio::test]
    async fn test_failure_sends_apology() {
        let broken = ScriptedAction::failing(ActionId::SendToGroup);
        let fallback = ScriptedAction::new(ActionId::Fallback, true);

        let mut registry = ActionRegistry::new(fallback.clone());
        registry.register(broken.clone());

        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sent_clone = Arc::clone(&sent);
        let mut transport = MockChatTransport::new();
        transport.expect_send_message().returning(move |m| {
            sent_clone.lock().unwrap().push(m);
            Ok(())
        });

        let router = MessageRouter::new(
            registry,
            classifier_returning(r#"{"action": "send_to_group", "confidence": 0.9}"#),
            services(Arc::new(transport)),
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        assert_eq!(decision, RoutingDecision::Failed);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "c1");
        assert_eq!(sent[0].content, GENERIC_APOLOGY);
    }

    #[tokio::test]
    async fn test_orphaned_dialog_state_cleared() {
        // State references an action missing from the registry
        let fallback = ScriptedAction::new(ActionId::Fallback, true);
        let registry = ActionRegistry::new(fallback.clone());

        let svcs = services(silent_transport());
        svcs.dialogs
            .set(
                "c1",
                DialogState::new(ActionId::Poll, DialogStage::Initial),
            )
            .await
            .unwrap();

        let router = MessageRouter::new(
            registry,
            classifier_returning("{}"),
            svcs.clone(),
            ClassifierConfig::default(),
        );

        let decision = router.dispatch(msg()).await;
        assert_eq!(decision, RoutingDecision::Defaulted);
        assert!(svcs.dialogs.get("c1").await.unwrap().is_none());
    }

    #[test]
    fn test_catalogue_lists_actions_in_order() {
        let fallback = ScriptedAction::new(ActionId::Fallback, true);
        let mut registry = ActionRegistry::new(fallback);
        registry.register(ScriptedAction::new(ActionId::SendToGroup, true));
        registry.register(ScriptedAction::new(ActionId::GroupRules, true));

        let catalogue = registry.catalogue();
        let send_pos = catalogue.find("send_to_group").unwrap();
        let rules_pos = catalogue.find("group_rules").unwrap();
        assert!(send_pos < rules_pos);
    }

    #[test]
    fn test_registry_get_finds_default() {
        let fallback = ScriptedAction::new(ActionId::Fallback, true);
        let registry = ActionRegistry::new(fallback);
        assert!(registry.get(ActionId::Fallback).is_some());
        assert!(registry.get(ActionId::Poll).is_none());
    }
}
