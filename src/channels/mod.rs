//! Messaging channel adapters
//!
//! Each platform implements the `Channel` trait to provide unified messaging.
//! Inbound events are forwarded over an mpsc channel of [`IncomingMessage`].

mod discord;
mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use discord::DiscordChannel;
pub use telegram::TelegramChannel;

use crate::Result;

/// A message received from a channel
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform message identifier
    pub id: String,

    /// Platform-scoped conversation id (`<platform>:<chat id>`)
    pub conversation_id: String,

    /// Sender identifier
    pub sender_id: String,

    /// Sender display name
    pub sender_name: String,

    /// Message content
    pub content: String,

    /// Whether this is a direct message
    pub is_dm: bool,

    /// When the platform says the message was sent
    pub timestamp: DateTime<Utc>,
}

/// A message to send to a channel
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Platform-scoped conversation id
    pub conversation_id: String,

    /// Message content (plain text, may contain markdown)
    pub content: String,
}

impl OutgoingMessage {
    /// Create a simple text message
    #[must_use]
    pub fn text(conversation_id: String, content: String) -> Self {
        Self {
            conversation_id,
            content,
        }
    }
}

/// Split a platform-scoped conversation id into `(platform, chat id)`
#[must_use]
pub fn split_conversation_id(conversation_id: &str) -> Option<(&str, &str)> {
    conversation_id.split_once(':')
}

/// Trait for messaging channel adapters
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name (also the conversation-id platform prefix)
    fn name(&self) -> &'static str;

    /// Connect to the channel
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the channel
    async fn disconnect(&mut self) -> Result<()>;

    /// Send a message
    async fn send(&self, message: OutgoingMessage) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send typing indicator to show the bot is processing
    ///
    /// Default implementation is a no-op for channels that don't support typing
    async fn send_typing(&self, _conversation_id: &str) -> Result<()> {
        Ok(())
    }
}
