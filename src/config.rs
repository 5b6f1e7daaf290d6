//! Configuration loaded from environment variables
//!
//! All settings are optional except `API_KEY` and at least one of
//! `DISCORD_TOKEN` / `TELEGRAM_TOKEN`.

use std::time::Duration;

use crate::{Error, Result};

/// Default completion endpoint
const DEFAULT_API_BASE_URL: &str = "https://api.intelligence.io.solutions/api/v1";

/// Default completion model
const DEFAULT_MODEL_NAME: &str = "meta-llama/Llama-3.3-70B-Instruct";

/// Default system prompt when `SYSTEM_PROMPT` is unset
const DEFAULT_SYSTEM_PROMPT: &str = "You are IO Chat, a helpful and conversational AI assistant. \
    You're chatting in a Discord/Telegram servers. Keep responses natural, \
    engaging, and appropriately sized for chat. Use Discord markdown \
    formatting when helpful (like **bold** or *italics*). \
    Be friendly but not overly enthusiastic.";

/// Relaybot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the completion endpoint (required)
    pub api_key: String,

    /// Discord bot token
    pub discord_token: Option<String>,

    /// Telegram bot token
    pub telegram_token: Option<String>,

    /// Completion endpoint base URL
    pub api_base_url: String,

    /// Completion model identifier
    pub model_name: String,

    /// Bound on per-conversation history length
    pub max_context_messages: usize,

    /// Pending-batch size that triggers an immediate flush
    pub message_batch_size: usize,

    /// Debounce window measured from the first unflushed message
    pub batch_debounce: Duration,

    /// Wall-clock bound on a single completion call
    pub processing_timeout: Duration,

    /// Minimum spacing between outbound completion calls, across all conversations
    pub rate_limit_delay: Duration,

    /// Response length cap (characters) applied before delivery
    pub max_response_length: usize,

    /// Interval between context-cleanup sweeps
    pub context_cleanup_interval: Duration,

    /// Idle age after which a conversation context is evicted
    pub context_idle_ttl: Duration,

    /// System prompt sent with every completion request
    pub system_prompt: String,
}

impl Config {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `API_KEY` is missing, if neither platform
    /// token is set, or if a numeric setting fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Split out from [`Config::from_env`] so parsing and validation can be
    /// tested without touching process-global environment state.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("API_KEY")
            .ok_or_else(|| Error::Config("API_KEY environment variable is required".to_string()))?;

        let discord_token = lookup("DISCORD_TOKEN").filter(|t| !t.is_empty());
        let telegram_token = lookup("TELEGRAM_TOKEN").filter(|t| !t.is_empty());

        if discord_token.is_none() && telegram_token.is_none() {
            return Err(Error::Config(
                "either DISCORD_TOKEN or TELEGRAM_TOKEN (or both) must be provided".to_string(),
            ));
        }

        Ok(Self {
            api_key,
            discord_token,
            telegram_token,
            api_base_url: lookup("API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            model_name: lookup("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            max_context_messages: parse_setting(&lookup, "MAX_CONTEXT_MESSAGES", 20)?,
            message_batch_size: parse_setting(&lookup, "MESSAGE_BATCH_SIZE", 5)?,
            batch_debounce: parse_secs(&lookup, "MESSAGE_BATCH_DEBOUNCE", 1.0)?,
            processing_timeout: parse_secs(&lookup, "PROCESSING_TIMEOUT", 25.0)?,
            rate_limit_delay: parse_secs(&lookup, "RATE_LIMIT_DELAY", 0.5)?,
            max_response_length: parse_setting(&lookup, "MAX_RESPONSE_LENGTH", 2000)?,
            context_cleanup_interval: parse_secs(&lookup, "CONTEXT_CLEANUP_INTERVAL", 300.0)?,
            context_idle_ttl: parse_secs(&lookup, "CONTEXT_IDLE_TTL", 1800.0)?,
            system_prompt: lookup("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }
}

/// Parse an integer setting, falling back to `default` when unset
fn parse_setting(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: usize,
) -> Result<usize> {
    lookup(key).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|_| Error::Config(format!("invalid {key}: {raw}")))
    })
}

/// Parse a seconds setting (fractional allowed), falling back to `default` when unset
fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: f64,
) -> Result<Duration> {
    let secs = lookup(key).map_or(Ok(default), |raw| {
        raw.parse::<f64>()
            .map_err(|_| Error::Config(format!("invalid {key}: {raw}")))
    })?;
    Duration::try_from_secs_f64(secs).map_err(|_| Error::Config(format!("invalid {key}: {secs}")))
}
