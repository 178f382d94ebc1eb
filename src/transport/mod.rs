//! Chat transport abstraction.
//!
//! Actions, the router and the mention sweeper all reply through the
//! [`ChatTransport`] trait rather than a concrete client, so delivery
//! failures stay observable at the call site (the sweep's delete-after-send
//! ordering depends on that) and tests can substitute a mock.

pub mod telegram;

pub use telegram::TelegramTransport;

use async_trait::async_trait;

use crate::bus::OutboundMessage;
use crate::error::Result;

/// Outbound side of the chat platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message, optionally with a one-time reply keyboard.
    ///
    /// # Errors
    /// `WardenError::TransportForbidden` when the bot lacks permission in
    /// the target chat (kicked, blocked); `WardenError::Transport` for
    /// everything else.
    async fn send_message(&self, msg: OutboundMessage) -> Result<()>;

    /// Number of members in a chat.
    async fn chat_member_count(&self, chat_id: &str) -> Result<u32>;

    /// Leave a chat. Terminal response to a forbidden room.
    async fn leave_chat(&self, chat_id: &str) -> Result<()>;
}
