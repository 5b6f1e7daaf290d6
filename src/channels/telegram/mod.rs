//! Telegram channel adapter
//!
//! Uses the raw Bot API over reqwest: long-poll `getUpdates` for receiving,
//! `sendMessage` for sending.

mod api;
pub mod polling;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;

use super::{Channel, IncomingMessage, OutgoingMessage, split_conversation_id};
use crate::{Error, Result};

/// Telegram channel adapter
#[derive(Clone)]
pub struct TelegramChannel {
    token: String,
    client: Client,
    message_tx: Option<mpsc::Sender<IncomingMessage>>,
    connected: bool,
}

impl TelegramChannel {
    /// Create a new Telegram channel adapter
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            token,
            client: Client::new(),
            message_tx: None,
            connected: false,
        }
    }

    /// Create with a message receiver for polling mode
    ///
    /// Returns the channel and a receiver for incoming messages
    #[must_use]
    pub fn with_receiver(token: String) -> (Self, mpsc::Receiver<IncomingMessage>) {
        let (tx, rx) = mpsc::channel(100);
        let channel = Self {
            token,
            client: Client::new(),
            message_tx: Some(tx),
            connected: false,
        };
        (channel, rx)
    }

    fn chat_id(conversation_id: &str) -> Result<i64> {
        let raw = split_conversation_id(conversation_id).map_or(conversation_id, |(_, id)| id);
        raw.parse()
            .map_err(|_| Error::Channel("Invalid chat ID".to_string()))
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn connect(&mut self) -> Result<()> {
        self.get_me().await?;
        self.connected = true;
        tracing::info!("Telegram channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        tracing::info!("Telegram channel disconnected");
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let chat_id = Self::chat_id(&message.conversation_id)?;
        self.send_message(chat_id, &message.content).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send_typing(&self, conversation_id: &str) -> Result<()> {
        let chat_id = Self::chat_id(conversation_id)?;
        self.send_chat_action(chat_id, "typing").await?;
        tracing::debug!(chat_id, "Telegram typing indicator sent");
        Ok(())
    }
}
