//! Daemon - the relay service
//!
//! Wires the completion client, processor, and channel adapters together:
//! connects whichever channels have tokens configured, fans their receivers
//! into the processor, answers the thin command surface, and runs the
//! periodic context-cleanup sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::channels::{
    Channel, DiscordChannel, IncomingMessage, OutgoingMessage, TelegramChannel,
    split_conversation_id,
};
use crate::context::Message;
use crate::llm::{CompletionApi, LlmClient};
use crate::processor::{MessageProcessor, Reply, ReplySink, Status};
use crate::{Config, Error, Result};

/// Delay between Telegram getUpdates polls
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Routes processor output to the channel that owns the conversation
#[derive(Default)]
struct ChannelRouter {
    channels: RwLock<HashMap<&'static str, Arc<dyn Channel>>>,
}

impl ChannelRouter {
    async fn register(&self, channel: Arc<dyn Channel>) {
        self.channels.write().await.insert(channel.name(), channel);
    }
}

#[async_trait]
impl ReplySink for ChannelRouter {
    async fn deliver(&self, conversation_id: &str, reply: Reply) {
        let Some((platform, _)) = split_conversation_id(conversation_id) else {
            tracing::warn!(conversation_id, "unroutable conversation id");
            return;
        };

        let channel = self.channels.read().await.get(platform).cloned();
        let Some(channel) = channel else {
            tracing::warn!(conversation_id, platform, "no channel for platform");
            return;
        };

        let outgoing =
            OutgoingMessage::text(conversation_id.to_string(), reply.content().to_string());
        if let Err(e) = channel.send(outgoing).await {
            tracing::error!(conversation = conversation_id, error = %e, "delivery failed");
        }
    }
}

/// The relay daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the completion client cannot be built or no channel
    /// could be started.
    pub async fn run(self) -> Result<()> {
        let api: Arc<dyn CompletionApi> = Arc::new(LlmClient::new(
            &self.config.api_base_url,
            self.config.api_key.clone(),
            self.config.model_name.clone(),
        )?);

        let router = Arc::new(ChannelRouter::default());
        let processor = Arc::new(MessageProcessor::new(
            &self.config,
            api,
            Arc::clone(&router) as Arc<dyn ReplySink>,
        ));

        let mut handlers = Vec::new();

        // Discord
        if let Some(token) = &self.config.discord_token {
            let (mut discord, rx) = DiscordChannel::with_receiver(token.clone());
            if let Err(e) = discord.connect().await {
                tracing::error!(error = %e, "Discord connect failed");
            } else {
                let discord: Arc<dyn Channel> = Arc::new(discord);
                router.register(Arc::clone(&discord)).await;
                handlers.push(tokio::spawn(handle_channel_messages(
                    rx,
                    Arc::clone(&processor),
                    discord,
                    self.config.model_name.clone(),
                )));
            }
        }

        // Telegram
        if let Some(token) = &self.config.telegram_token {
            let (mut telegram, rx) = TelegramChannel::with_receiver(token.clone());
            if let Err(e) = telegram.connect().await {
                tracing::error!(error = %e, "Telegram connect failed");
            } else {
                drop(telegram.start_polling(POLL_INTERVAL));
                let telegram: Arc<dyn Channel> = Arc::new(telegram);
                router.register(Arc::clone(&telegram)).await;
                handlers.push(tokio::spawn(handle_channel_messages(
                    rx,
                    Arc::clone(&processor),
                    telegram,
                    self.config.model_name.clone(),
                )));
            }
        }

        if handlers.is_empty() {
            return Err(Error::Channel(
                "no channels available to start; check your tokens".to_string(),
            ));
        }

        // Periodic context cleanup
        let cleanup = {
            let processor = Arc::clone(&processor);
            let period = self.config.context_cleanup_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    processor.cleanup_idle();
                }
            })
        };

        tracing::info!(channels = handlers.len(), "relay daemon running");

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("shutdown signal received");
            }
            () = async { futures::future::join_all(handlers).await; } => {
                tracing::warn!("all channel handlers stopped");
            }
        }

        cleanup.abort();
        Ok(())
    }
}

/// The thin command surface shared by both platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Help,
    Status,
    Clear,
}

impl Command {
    /// Parse `!help` / `/help` style commands, tolerating `@BotName` suffixes
    /// and trailing arguments.
    fn parse(content: &str) -> Option<Self> {
        let trimmed = content.trim();
        let body = trimmed
            .strip_prefix('!')
            .or_else(|| trimmed.strip_prefix('/'))?;
        let word = body.split_whitespace().next()?;
        let word = word.split('@').next().unwrap_or(word);
        match word.to_ascii_lowercase().as_str() {
            "help" => Some(Self::Help),
            "status" => Some(Self::Status),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

/// Whether the content looks like a command attempt (known or not)
fn is_command_like(content: &str) -> bool {
    let trimmed = content.trim_start();
    trimmed.starts_with('!') || trimmed.starts_with('/')
}

/// Handle incoming messages from one channel
async fn handle_channel_messages(
    mut rx: mpsc::Receiver<IncomingMessage>,
    processor: Arc<MessageProcessor>,
    channel: Arc<dyn Channel>,
    model_name: String,
) {
    let name = channel.name();
    tracing::info!(channel = name, "channel handler started");

    while let Some(msg) = rx.recv().await {
        if let Some(command) = Command::parse(&msg.content) {
            let response = match command {
                Command::Help => help_text(),
                Command::Status => status_text(&processor.status(), &model_name),
                Command::Clear => {
                    if processor.clear(&msg.conversation_id) {
                        "Conversation context cleared.".to_string()
                    } else {
                        "No conversation context to clear.".to_string()
                    }
                }
            };
            let outgoing = OutgoingMessage::text(msg.conversation_id.clone(), response);
            if let Err(e) = channel.send(outgoing).await {
                tracing::error!(channel = name, error = %e, "command reply send error");
            }
            continue;
        }

        // Unknown commands stay silent
        if is_command_like(&msg.content) {
            continue;
        }

        if let Err(e) = channel.send_typing(&msg.conversation_id).await {
            tracing::debug!(channel = name, error = %e, "typing indicator failed");
        }

        let message = Message::user(&msg.conversation_id, &msg.sender_name, &msg.content);
        processor.submit(&msg.conversation_id, message);
    }

    tracing::info!(channel = name, "channel handler stopped");
}

fn help_text() -> String {
    "*Relay Bot*\n\n\
     Chat with me:\n\
     - Mention me, reply to me, or send me a DM on Discord\n\
     - Send me any message on Telegram\n\
     - I maintain conversation context\n\n\
     Commands (`!` on Discord, `/` on Telegram):\n\
     - `help` - show this help\n\
     - `status` - bot status\n\
     - `clear` - clear conversation context"
        .to_string()
}

fn status_text(status: &Status, model_name: &str) -> String {
    format!(
        "*Relay Bot Status*\n\n\
         Uptime: `{}`\n\
         Active conversations: `{}`\n\
         Model: `{model_name}`",
        format_uptime(status.uptime),
        status.active_conversations,
    )
}

/// Render an uptime as `1h 2m 3s`
fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_either_prefix() {
        assert_eq!(Command::parse("!help"), Some(Command::Help));
        assert_eq!(Command::parse("/status"), Some(Command::Status));
        assert_eq!(Command::parse("  /clear  "), Some(Command::Clear));
    }

    #[test]
    fn telegram_bot_suffix_is_ignored() {
        assert_eq!(Command::parse("/clear@RelayBot"), Some(Command::Clear));
    }

    #[test]
    fn unknown_commands_do_not_parse() {
        assert_eq!(Command::parse("/frobnicate"), None);
        assert!(is_command_like("/frobnicate"));
        assert!(!is_command_like("plain text"));
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello there"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn uptime_formats_hours_minutes_seconds() {
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h 2m 3s");
        assert_eq!(format_uptime(Duration::from_secs(59)), "0h 0m 59s");
    }
}
