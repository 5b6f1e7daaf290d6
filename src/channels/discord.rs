//! Discord channel adapter using serenity

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::Client;
use serenity::all::{
    ActivityData, ChannelId, Context, CreateMessage, EventHandler, GatewayIntents, Message, Ready,
    UserId,
};
use tokio::sync::{Mutex, mpsc};

use super::{Channel, IncomingMessage, OutgoingMessage, split_conversation_id};
use crate::{Error, Result};

/// Discord channel adapter
pub struct DiscordChannel {
    token: String,
    message_tx: Option<mpsc::Sender<IncomingMessage>>,
    http: Option<Arc<serenity::http::Http>>,
    connected: bool,
}

impl DiscordChannel {
    /// Create a new Discord channel adapter
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self {
            token,
            message_tx: None,
            http: None,
            connected: false,
        }
    }

    /// Create with a message receiver
    ///
    /// Returns the channel and a receiver for incoming messages
    #[must_use]
    pub fn with_receiver(token: String) -> (Self, mpsc::Receiver<IncomingMessage>) {
        let (tx, rx) = mpsc::channel(100);
        let channel = Self {
            token,
            message_tx: Some(tx),
            http: None,
            connected: false,
        };
        (channel, rx)
    }

    fn chat_id(message: &OutgoingMessage) -> Result<ChannelId> {
        let raw = split_conversation_id(&message.conversation_id)
            .map_or(message.conversation_id.as_str(), |(_, id)| id);
        let id: u64 = raw
            .parse()
            .map_err(|_| Error::Channel("Invalid channel ID".to_string()))?;
        Ok(ChannelId::new(id))
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn connect(&mut self) -> Result<()> {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = DiscordHandler {
            message_tx: Arc::new(Mutex::new(self.message_tx.clone())),
            bot_id: OnceLock::new(),
        };

        let client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| Error::Channel(format!("Discord client error: {e}")))?;

        self.http = Some(client.http.clone());

        // Spawn the client in a background task
        let mut client_runner = client;
        tokio::spawn(async move {
            if let Err(e) = client_runner.start().await {
                tracing::error!(error = %e, "Discord client error");
            }
        });

        self.connected = true;
        tracing::info!("Discord channel connected");

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        // Client will be dropped when the task completes
        tracing::info!("Discord channel disconnected");
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| Error::Channel("Discord not connected".to_string()))?;

        let channel = Self::chat_id(&message)?;

        channel
            .send_message(http, CreateMessage::new().content(&message.content))
            .await
            .map_err(|e| Error::Channel(format!("Discord send error: {e}")))?;

        tracing::debug!(conversation = %message.conversation_id, "Discord message sent");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send_typing(&self, conversation_id: &str) -> Result<()> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| Error::Channel("Discord not connected".to_string()))?;

        let raw = split_conversation_id(conversation_id).map_or(conversation_id, |(_, id)| id);
        let id: u64 = raw
            .parse()
            .map_err(|_| Error::Channel("Invalid channel ID".to_string()))?;

        ChannelId::new(id)
            .broadcast_typing(http)
            .await
            .map_err(|e| Error::Channel(format!("Discord typing error: {e}")))?;

        tracing::debug!(conversation_id, "Discord typing indicator sent");
        Ok(())
    }
}

/// Discord event handler
struct DiscordHandler {
    message_tx: Arc<Mutex<Option<mpsc::Sender<IncomingMessage>>>>,
    /// Set from the ready event
    bot_id: OnceLock<UserId>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        ctx.set_activity(Some(ActivityData::listening("your conversations | !help")));
        tracing::info!(user = %ready.user.name, "Discord bot ready");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Ignore bot messages
        if msg.author.bot {
            return;
        }

        let is_dm = msg.guild_id.is_none();
        let is_mention = msg.mentions_me(&ctx).await.unwrap_or(false);
        let is_reply_to_bot = self.bot_id.get().is_some_and(|bot_id| {
            msg.referenced_message
                .as_ref()
                .is_some_and(|referenced| referenced.author.id == *bot_id)
        });
        let is_command = msg.content.trim_start().starts_with('!');

        // Only respond to DMs, mentions, replies to the bot, and commands
        if !(is_dm || is_mention || is_reply_to_bot || is_command) {
            return;
        }

        let bot_id = self.bot_id.get().map_or(0, |id| id.get());
        let content = strip_bot_mentions(&msg.content, bot_id);
        if content.is_empty() {
            return;
        }

        let sender_name = msg
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| msg.author.name.clone());

        let incoming = IncomingMessage {
            id: msg.id.to_string(),
            conversation_id: format!("discord:{}", msg.channel_id),
            sender_id: msg.author.id.to_string(),
            sender_name,
            content,
            is_dm,
            timestamp: DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0)
                .unwrap_or_else(Utc::now),
        };

        if let Some(tx) = self.message_tx.lock().await.as_ref() {
            if let Err(e) = tx.send(incoming).await {
                tracing::warn!(error = %e, "Failed to forward Discord message");
            }
        }

        tracing::debug!(
            author = %msg.author.name,
            conversation = %msg.channel_id,
            is_dm,
            "Discord message received"
        );
    }
}

/// Remove `<@id>` / `<@!id>` mention markup for the bot itself, leaving other text
fn strip_bot_mentions(content: &str, bot_id: u64) -> String {
    if bot_id == 0 {
        return content.trim().to_string();
    }
    content
        .replace(&format!("<@{bot_id}>"), "")
        .replace(&format!("<@!{bot_id}>"), "")
        .trim()
        .to_string()
}
