//! Event types for the GroupWarden update bus
//!
//! This module defines the inbound event types delivered by the chat
//! transport and the outbound message shape handed back to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a chat is a private conversation or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// One-on-one conversation with the bot
    Private,
    /// Group or supergroup chat
    Group,
}

/// A resolved `@user` reference inside a message.
///
/// Offsets follow the transport's entity annotations (UTF-16 code units for
/// Telegram); the resolved fields are what the tracker actually consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionSpan {
    /// Offset of the mention within the message text
    pub offset: usize,
    /// Length of the mention span
    pub length: usize,
    /// Username without the leading `@`, when the mention is textual
    pub username: Option<String>,
    /// Resolved user ID, when the transport provides one
    pub user_id: Option<String>,
}

/// An inbound update delivered by the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InboundEvent {
    /// A user posted a message
    Message(InboundMessage),
    /// A new member joined a group chat
    MemberJoined(MemberJoined),
}

/// A member-joined notification from a group chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberJoined {
    /// Chat the member joined
    pub chat_id: String,
    /// Human-readable chat title, if any
    pub chat_title: Option<String>,
    /// Joining user's ID
    pub user_id: String,
    /// Joining user's username, if set
    pub username: Option<String>,
}

/// Represents an incoming message from the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Sender's username without the leading `@`, if set
    pub sender_username: Option<String>,
    /// Unique identifier of the chat/conversation
    pub chat_id: String,
    /// Human-readable chat title (groups only)
    pub chat_title: Option<String>,
    /// Private or group chat
    pub chat_kind: ChatKind,
    /// Transport-assigned message identifier, unique within the chat
    pub message_id: String,
    /// The text content of the message
    pub content: String,
    /// `@user` references found in the message
    pub mentions: Vec<MentionSpan>,
    /// When the message was sent
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Creates a new inbound message with the required fields.
    ///
    /// # Example
    /// ```
    /// use groupwarden::bus::{ChatKind, InboundMessage};
    ///
    /// let msg = InboundMessage::new("user123", "chat456", "42", "Hello, bot!", ChatKind::Group);
    /// assert_eq!(msg.chat_id, "chat456");
    /// assert!(msg.mentions.is_empty());
    /// ```
    pub fn new(
        sender_id: &str,
        chat_id: &str,
        message_id: &str,
        content: &str,
        chat_kind: ChatKind,
    ) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sender_username: None,
            chat_id: chat_id.to_string(),
            chat_title: None,
            chat_kind,
            message_id: message_id.to_string(),
            content: content.to_string(),
            mentions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builder-style setter for the sender username.
    pub fn with_username(mut self, username: &str) -> Self {
        self.sender_username = Some(username.to_string());
        self
    }

    /// Builder-style setter for the chat title.
    pub fn with_chat_title(mut self, title: &str) -> Self {
        self.chat_title = Some(title.to_string());
        self
    }

    /// Builder-style setter for mention spans.
    pub fn with_mentions(mut self, mentions: Vec<MentionSpan>) -> Self {
        self.mentions = mentions;
        self
    }
}

/// Represents an outgoing message to be sent via the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// The chat/conversation to send to
    pub chat_id: String,
    /// The text content to send
    pub content: String,
    /// Optional one-time reply keyboard, rows of button labels
    pub keyboard: Option<Vec<Vec<String>>>,
}

impl OutboundMessage {
    /// Creates a plain text outbound message.
    pub fn new(chat_id: &str, content: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            keyboard: None,
        }
    }

    /// Creates an outbound message with a reply keyboard.
    pub fn with_keyboard(chat_id: &str, content: &str, keyboard: Vec<Vec<String>>) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            keyboard: Some(keyboard),
        }
    }
}
