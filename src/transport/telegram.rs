//! Telegram transport implementation.
//!
//! Connects to the Telegram Bot API via teloxide, maps raw updates into
//! [`InboundEvent`]s on the update bus, and implements [`ChatTransport`]
//! for outbound sends. Supports allowlist-based access control, startup
//! connectivity retries with exponential backoff, and graceful shutdown.

use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use teloxide::types::{
    ChatId, KeyboardButton, KeyboardMarkup, Message, MessageEntityKind, ReplyMarkup,
};
use teloxide::{ApiError, RequestError};

use crate::bus::{
    ChatKind, InboundEvent, InboundMessage, MemberJoined, MentionSpan, OutboundMessage, UpdateBus,
};
use crate::config::TelegramConfig;
use crate::error::{Result, WardenError};
use crate::utils::string::preview;

use super::ChatTransport;

/// Maximum number of startup connectivity retries before giving up.
const MAX_STARTUP_RETRIES: u32 = 10;
/// Base delay (in seconds) for exponential backoff on startup retries.
const BASE_RETRY_DELAY_SECS: u64 = 2;
/// Maximum delay (in seconds) for exponential backoff on startup retries.
const MAX_RETRY_DELAY_SECS: u64 = 120;

/// Telegram transport using teloxide.
///
/// Inbound updates flow to the [`UpdateBus`]; outbound sends go through
/// the [`ChatTransport`] impl on a cached bot instance.
pub struct TelegramTransport {
    /// Telegram-specific configuration (token, allowlist, etc.)
    config: TelegramConfig,
    /// Reference to the update bus for publishing inbound events
    bus: Arc<UpdateBus>,
    /// Atomic flag indicating if the transport is currently running.
    /// Wrapped in Arc so the spawned polling task can update it.
    running: Arc<AtomicBool>,
    /// Sender to signal shutdown to the polling task
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Cached bot instance for sending messages (avoids rebuilding HTTP client)
    bot: Option<teloxide::Bot>,
}

impl TelegramTransport {
    /// Creates a new Telegram transport with the given configuration.
    pub fn new(config: TelegramConfig, bus: Arc<UpdateBus>) -> Self {
        Self {
            config,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            bot: None,
        }
    }

    /// Returns whether the transport is enabled in configuration.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns whether the transport is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Checks if a user may talk to the bot.
    pub fn is_allowed(&self, user_id: &str) -> bool {
        user_allowed(&self.config.allow_from, self.config.deny_by_default, user_id)
    }

    /// Calculates the exponential backoff delay for a startup retry attempt.
    fn startup_backoff_delay(attempt: u32) -> Duration {
        let delay_secs = BASE_RETRY_DELAY_SECS
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_RETRY_DELAY_SECS);
        Duration::from_secs(delay_secs)
    }

    /// Delay before the next startup attempt. A server-provided
    /// retry-after hint wins over the exponential backoff.
    fn startup_retry_delay(e: &RequestError, attempt: u32) -> Duration {
        if let RequestError::RetryAfter(d) = e {
            d.duration()
        } else {
            Self::startup_backoff_delay(attempt)
        }
    }

    /// Build a Telegram bot client with explicit proxy behavior.
    ///
    /// Automatic system proxy detection is disabled to avoid platform
    /// keychain lookups in sandboxed runtime environments.
    fn build_bot(token: &str) -> Result<teloxide::Bot> {
        let client = teloxide::net::default_reqwest_settings()
            .no_proxy()
            .build()
            .map_err(|e| {
                WardenError::Transport(format!("failed to build Telegram HTTP client: {e}"))
            })?;
        Ok(teloxide::Bot::with_client(token.to_string(), client))
    }

    /// Starts the Telegram polling loop.
    ///
    /// Spawns a background task and returns immediately; polling errors
    /// are logged but don't stop the transport.
    pub async fn start(&mut self) -> Result<()> {
        // Prevent double-start
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Telegram transport already running");
            return Ok(());
        }

        if !self.config.enabled {
            warn!("Telegram transport is disabled in configuration");
            self.running.store(false, Ordering::SeqCst);
            return Ok(());
        }

        if self.config.token.is_empty() {
            error!("Telegram bot token is empty");
            self.running.store(false, Ordering::SeqCst);
            return Err(WardenError::Config("Telegram bot token is empty".into()));
        }

        info!("Starting Telegram transport");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let token = self.config.token.clone();
        let bus = self.bus.clone();
        let allowlist = self.config.allow_from.clone();
        let deny_by_default = self.config.deny_by_default;
        // Share the same running flag with the spawned task so state stays in sync
        let running_clone = Arc::clone(&self.running);

        let bot = match Self::build_bot(&token) {
            Ok(bot) => bot,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        // Cache the bot for send() calls
        self.bot = Some(bot.clone());

        tokio::spawn(async move {
            use teloxide::prelude::*;

            let task_result = std::panic::AssertUnwindSafe(async move {
                // Startup check with retries so transient errors (DNS not
                // ready, interface still coming up) don't permanently kill
                // the transport. Permanent errors (invalid token) bail on
                // the first attempt.
                let mut attempt: u32 = 0;
                loop {
                    match bot.get_me().await {
                        Ok(_) => break,
                        Err(e) => {
                            let is_transient = matches!(
                                &e,
                                RequestError::Network(_)
                                    | RequestError::Io(_)
                                    | RequestError::RetryAfter(_)
                            );

                            if !is_transient || attempt >= MAX_STARTUP_RETRIES {
                                error!(
                                    "Telegram startup check failed after {} attempt(s): {}",
                                    attempt + 1,
                                    e
                                );
                                return;
                            }

                            let delay = TelegramTransport::startup_retry_delay(&e, attempt);
                            warn!(
                                "Telegram startup check failed (attempt {}/{}), retrying in {}s: {}",
                                attempt + 1,
                                MAX_STARTUP_RETRIES,
                                delay.as_secs(),
                                e
                            );
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    info!("Telegram transport shutdown during startup retry");
                                    return;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            attempt += 1;
                        }
                    }
                }

                // Note: dptree injects dependencies separately, not as tuples
                let handler = Update::filter_message().endpoint(
                    |_bot: Bot,
                     msg: Message,
                     bus: Arc<UpdateBus>,
                     allowlist: Vec<String>,
                     deny_by_default: bool| async move {
                        for event in map_message(&msg) {
                            if let InboundEvent::Message(ref inbound) = event {
                                if !user_allowed(&allowlist, deny_by_default, &inbound.sender_id) {
                                    info!(
                                        "Telegram: user {} not in allowlist, ignoring message",
                                        inbound.sender_id
                                    );
                                    continue;
                                }
                                info!(
                                    "Telegram: message from {} in chat {}: {}",
                                    inbound.sender_id,
                                    inbound.chat_id,
                                    preview(&inbound.content, 50)
                                );
                            }
                            if let Err(e) = bus.publish(event).await {
                                error!("Failed to publish inbound event to bus: {}", e);
                            }
                        }

                        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                    },
                );

                let mut dispatcher = Dispatcher::builder(bot, handler)
                    .dependencies(dptree::deps![bus, allowlist, deny_by_default])
                    .build();

                info!("Telegram dispatcher started, waiting for updates...");

                tokio::select! {
                    _ = dispatcher.dispatch() => {
                        info!("Telegram dispatcher completed");
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Telegram transport shutdown signal received");
                    }
                }
            })
            .catch_unwind()
            .await;

            if task_result.is_err() {
                error!("Telegram polling task panicked");
            }

            running_clone.store(false, Ordering::SeqCst);
            info!("Telegram polling task stopped");
        });

        Ok(())
    }

    /// Stops the polling loop.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Telegram transport already stopped");
            return Ok(());
        }

        info!("Stopping Telegram transport");

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).await.is_err() {
                warn!("Telegram shutdown channel already closed");
            }
        }

        self.bot = None;

        info!("Telegram transport stopped");
        Ok(())
    }

    fn cached_bot(&self) -> Result<&teloxide::Bot> {
        self.bot
            .as_ref()
            .ok_or_else(|| WardenError::Transport("Telegram bot not initialized".into()))
    }

    fn parse_chat_id(chat_id: &str) -> Result<ChatId> {
        chat_id
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| WardenError::Transport(format!("invalid Telegram chat ID: {chat_id}")))
    }
}

/// Allowlist check shared by the handler closure and `is_allowed`.
fn user_allowed(allowlist: &[String], deny_by_default: bool, user_id: &str) -> bool {
    if allowlist.is_empty() {
        !deny_by_default
    } else {
        allowlist.iter().any(|u| u == user_id)
    }
}

/// Map a send error, distinguishing permission failures from the rest.
fn map_send_error(e: RequestError) -> WardenError {
    match &e {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::NotEnoughRightsToPostMessages,
        ) => WardenError::TransportForbidden(e.to_string()),
        _ => WardenError::Transport(format!("failed to send Telegram message: {e}")),
    }
}

/// Slice `text` by UTF-16 code-unit offsets, which is how Telegram
/// addresses entity spans.
fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    if end > units.len() {
        return None;
    }
    String::from_utf16(&units[offset..end]).ok()
}

/// Scan raw text for `@username` when Telegram sent no entity annotations.
/// Spans are reported in UTF-16 code units to match the entity convention.
fn scan_mentions(text: &str) -> Vec<MentionSpan> {
    let Some(re) = Regex::new(r"@([A-Za-z][A-Za-z0-9_]{4,31})").ok() else {
        return Vec::new();
    };
    re.find_iter(text)
        .map(|m| MentionSpan {
            offset: text[..m.start()].encode_utf16().count(),
            length: m.as_str().encode_utf16().count(),
            username: Some(m.as_str().trim_start_matches('@').to_string()),
            user_id: None,
        })
        .collect()
}

/// Extract mention spans from a message's entity annotations.
fn extract_mentions(msg: &Message) -> Vec<MentionSpan> {
    let Some(text) = msg.text() else {
        return Vec::new();
    };
    let Some(entities) = msg.entities() else {
        return scan_mentions(text);
    };

    let mut mentions = Vec::new();
    for entity in entities {
        match &entity.kind {
            MessageEntityKind::Mention => {
                let span = utf16_slice(text, entity.offset, entity.length);
                let username = span
                    .as_deref()
                    .map(|s| s.trim_start_matches('@').to_string());
                mentions.push(MentionSpan {
                    offset: entity.offset,
                    length: entity.length,
                    username,
                    user_id: None,
                });
            }
            MessageEntityKind::TextMention { user } => {
                mentions.push(MentionSpan {
                    offset: entity.offset,
                    length: entity.length,
                    username: user.username.clone(),
                    user_id: Some(user.id.0.to_string()),
                });
            }
            _ => {}
        }
    }
    mentions
}

/// Map a raw Telegram message into zero or more inbound events.
///
/// A service message announcing new members yields one `MemberJoined`
/// event per member; a text message yields one `Message` event.
fn map_message(msg: &Message) -> Vec<InboundEvent> {
    let chat_id = msg.chat.id.0.to_string();
    let chat_title = msg.chat.title().map(|t| t.to_string());

    if let Some(members) = msg.new_chat_members() {
        return members
            .iter()
            .map(|user| {
                InboundEvent::MemberJoined(MemberJoined {
                    chat_id: chat_id.clone(),
                    chat_title: chat_title.clone(),
                    user_id: user.id.0.to_string(),
                    username: user.username.clone(),
                })
            })
            .collect();
    }

    let Some(text) = msg.text() else {
        return Vec::new();
    };
    let Some(from) = msg.from.as_ref() else {
        return Vec::new();
    };

    let chat_kind = if msg.chat.is_private() {
        ChatKind::Private
    } else {
        ChatKind::Group
    };

    let mut inbound = InboundMessage::new(
        &from.id.0.to_string(),
        &chat_id,
        &msg.id.0.to_string(),
        text,
        chat_kind,
    )
    .with_mentions(extract_mentions(msg));
    inbound.sender_username = from.username.clone();
    inbound.chat_title = chat_title;

    vec![InboundEvent::Message(inbound)]
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, msg: OutboundMessage) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            warn!("Telegram transport not running, cannot send message");
            return Err(WardenError::Transport(
                "Telegram transport not running".into(),
            ));
        }

        let chat_id = Self::parse_chat_id(&msg.chat_id)?;
        let bot = self.cached_bot()?;

        use teloxide::prelude::*;
        let mut request = bot.send_message(chat_id, &msg.content);
        if let Some(rows) = &msg.keyboard {
            let keyboard: Vec<Vec<KeyboardButton>> = rows
                .iter()
                .map(|row| row.iter().map(KeyboardButton::new).collect())
                .collect();
            let markup = KeyboardMarkup::new(keyboard)
                .resize_keyboard()
                .one_time_keyboard();
            request = request.reply_markup(ReplyMarkup::Keyboard(markup));
        }

        request.await.map_err(map_send_error)?;
        Ok(())
    }

    async fn chat_member_count(&self, chat_id: &str) -> Result<u32> {
        use teloxide::prelude::*;
        let chat_id = Self::parse_chat_id(chat_id)?;
        let bot = self.cached_bot()?;
        let count = bot
            .get_chat_member_count(chat_id)
            .await
            .map_err(|e| WardenError::Transport(format!("get_chat_member_count failed: {e}")))?;
        Ok(count)
    }

    async fn leave_chat(&self, chat_id: &str) -> Result<()> {
        use teloxide::prelude::*;
        let chat_id = Self::parse_chat_id(chat_id)?;
        let bot = self.cached_bot()?;
        bot.leave_chat(chat_id)
            .await
            .map_err(|e| WardenError::Transport(format!("leave_chat failed: {e}")))?;
        Ok(())
    }
}
