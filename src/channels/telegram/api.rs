//! Raw Telegram Bot API calls

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Telegram Bot API base URL (token appended)
pub(super) const API_BASE: &str = "https://api.telegram.org/bot";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SendChatActionRequest<'a> {
    chat_id: i64,
    action: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

impl super::TelegramChannel {
    /// Send a message to a chat
    ///
    /// Uses Markdown parse mode with a plain-text retry when Telegram rejects
    /// the entity parse.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{API_BASE}{}/sendMessage", self.token);

        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some("Markdown"),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram API error: {e}")))?;

        if response.status().is_success() {
            tracing::debug!(chat_id, "Telegram message sent");
            return Ok(());
        }

        let status = response.status();
        tracing::debug!(chat_id, %status, "Markdown send rejected, retrying as plain text");

        let fallback = SendMessageRequest {
            chat_id,
            text,
            parse_mode: None,
        };

        let fallback_response = self
            .client
            .post(&url)
            .json(&fallback)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram API error: {e}")))?;

        if !fallback_response.status().is_success() {
            let fallback_status = fallback_response.status();
            let body = fallback_response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Telegram API error: {fallback_status} - {body}"
            )));
        }

        tracing::debug!(chat_id, "Telegram message sent (plain text)");
        Ok(())
    }

    /// Send a chat action (e.g. `typing`)
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let url = format!("{API_BASE}{}/sendChatAction", self.token);

        let response = self
            .client
            .post(&url)
            .json(&SendChatActionRequest { chat_id, action })
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Channel(format!(
                "Telegram sendChatAction error: {status}"
            )));
        }

        Ok(())
    }

    /// Validate the token against `getMe`
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or the token is rejected
    pub async fn get_me(&self) -> Result<()> {
        let url = format!("{API_BASE}{}/getMe", self.token);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram getMe error: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Channel(format!("Telegram response read error: {e}")))?;

        if !status.is_success() {
            return Err(Error::Channel(format!(
                "Telegram getMe error: {status} - {body}"
            )));
        }

        let parsed: TelegramResponse<BotUser> = serde_json::from_str(&body)
            .map_err(|e| Error::Channel(format!("Telegram response parse error: {e}")))?;

        match parsed.result {
            Some(me) => {
                tracing::info!(username = ?me.username, "Telegram token validated");
                Ok(())
            }
            None => Err(Error::Channel(format!(
                "Telegram getMe rejected: {}",
                parsed.description.unwrap_or_default()
            ))),
        }
    }
}
