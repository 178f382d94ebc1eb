//! GroupWarden - Telegram group assistant with intent routing and mention tracking

pub mod actions;
pub mod bus;
pub mod classifier;
pub mod config;
pub mod dialog;
pub mod error;
pub mod mentions;
pub mod router;
pub mod store;
pub mod transport;
pub mod utils;

pub use bus::{InboundEvent, InboundMessage, OutboundMessage, UpdateBus};
pub use classifier::{ActionId, IntentClassifier, IntentGuess};
pub use config::Config;
pub use dialog::{DialogStage, DialogState, DialogStateService};
pub use error::{Result, WardenError};
pub use mentions::{MentionSweeper, MentionTracker, PendingMention};
pub use router::{Action, ActionContext, ActionRegistry, MessageRouter, RoutingDecision};
pub use store::{ConversationStore, MemoryStore, RedisStore};
pub use transport::{ChatTransport, TelegramTransport};
