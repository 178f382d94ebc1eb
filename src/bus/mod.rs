//! Update Bus Module
//!
//! This module provides the queue between the chat transport and the
//! router loop. The transport publishes inbound events as they arrive;
//! the router loop consumes them one at a time, which is what gives us
//! per-arrival ordering without extra locking.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────>│  UpdateBus  │────>│   Router    │
//! │  (Telegram) │     │  (inbound)  │     │    loop     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! Replies do not travel back through the bus: actions and the sweeper
//! send through the `ChatTransport` handle directly so they can observe
//! delivery failures synchronously.

pub mod message;

pub use message::{
    ChatKind, InboundEvent, InboundMessage, MemberJoined, MentionSpan, OutboundMessage,
};

use crate::error::{Result, WardenError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Default buffer size for the inbound queue
const DEFAULT_BUFFER_SIZE: usize = 100;

/// The queue carrying inbound events from the transport to the router loop.
///
/// Backed by an async MPSC channel: many transport tasks may publish,
/// a single router loop consumes.
pub struct UpdateBus {
    /// Sender for inbound events
    inbound_tx: mpsc::Sender<InboundEvent>,
    /// Receiver for inbound events (wrapped in Arc<Mutex> for shared access)
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundEvent>>>,
}

impl UpdateBus {
    /// Creates a new `UpdateBus` with the default buffer size (100 events).
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Creates a new `UpdateBus` with a custom buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
        }
    }

    /// Publishes an inbound event to the bus.
    ///
    /// Called by the transport when an update arrives from Telegram.
    ///
    /// # Errors
    /// Returns `WardenError::BusClosed` if the receiver has been dropped.
    pub async fn publish(&self, event: InboundEvent) -> Result<()> {
        self.inbound_tx
            .send(event)
            .await
            .map_err(|_| WardenError::BusClosed)
    }

    /// Consumes the next inbound event from the bus.
    ///
    /// Returns `None` if the channel is closed (all senders dropped).
    pub async fn consume(&self) -> Option<InboundEvent> {
        self.inbound_rx.lock().await.recv().await
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}
