//! Telegram polling mode: getUpdates loop and message conversion

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::api::API_BASE;
use crate::channels::IncomingMessage;

/// How many recently seen update ids to remember
const SEEN_CAPACITY: usize = 256;

/// Response from Telegram getUpdates API
#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    result: Vec<PollingUpdate>,
}

/// A single update from getUpdates
#[derive(Debug, Deserialize)]
struct PollingUpdate {
    update_id: i64,
    message: Option<PollingMessage>,
}

/// Message from a polling update
#[derive(Debug, Deserialize)]
struct PollingMessage {
    message_id: i64,
    date: i64,
    chat: PollingChat,
    from: Option<PollingUser>,
    text: Option<String>,
}

/// Chat info from polling
#[derive(Debug, Deserialize)]
struct PollingChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
}

/// User info from polling
#[derive(Debug, Deserialize)]
struct PollingUser {
    id: i64,
    is_bot: bool,
    first_name: String,
}

/// Window of recently seen update ids
///
/// The offset parameter already advances past confirmed updates; this guards
/// against redelivery when the poll loop restarts after an error.
struct SeenUpdates {
    ids: VecDeque<i64>,
    capacity: usize,
}

impl SeenUpdates {
    fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an update id. Returns `false` if it was already seen.
    fn insert(&mut self, update_id: i64) -> bool {
        if self.ids.contains(&update_id) {
            return false;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(update_id);
        true
    }
}

impl super::TelegramChannel {
    /// Spawn a background task that polls Telegram's getUpdates API
    ///
    /// Polls with a long-poll timeout and forwards received messages into the
    /// mpsc channel. Deletes any existing webhook before starting to avoid
    /// conflicts.
    pub fn start_polling(&self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let token = self.token.clone();
        let client = self.client.clone();
        let tx = self
            .message_tx
            .clone()
            .expect("start_polling requires a message_tx (use with_receiver)");

        tokio::spawn(async move {
            polling_loop(token, client, tx, interval).await;
        })
    }
}

/// Run the polling loop (background task)
async fn polling_loop(
    token: String,
    client: reqwest::Client,
    tx: mpsc::Sender<IncomingMessage>,
    interval: std::time::Duration,
) {
    // Delete any existing webhook so getUpdates works
    let delete_url = format!("{API_BASE}{token}/deleteWebhook");
    if let Err(e) = client.post(&delete_url).send().await {
        tracing::warn!(error = %e, "failed to delete Telegram webhook before polling");
    }

    let mut offset: Option<i64> = None;
    let mut seen = SeenUpdates::new(SEEN_CAPACITY);

    loop {
        let url = format!("{API_BASE}{token}/getUpdates");
        let mut params = serde_json::json!({
            "timeout": 30,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            params["offset"] = serde_json::json!(off);
        }

        match client.post(&url).json(&params).send().await {
            Ok(resp) => {
                if let Ok(body) = resp.text().await {
                    if let Ok(updates) = serde_json::from_str::<GetUpdatesResponse>(&body) {
                        for update in &updates.result {
                            // Advance offset past this update
                            offset = Some(update.update_id + 1);

                            if !seen.insert(update.update_id) {
                                continue;
                            }

                            if let Some(msg) = update_to_incoming(update) {
                                if let Err(e) = tx.send(msg).await {
                                    tracing::warn!(error = %e, "failed to forward Telegram message");
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Telegram getUpdates error");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Convert a polling update into an `IncomingMessage`
///
/// Skips updates without text and messages sent by other bots.
fn update_to_incoming(update: &PollingUpdate) -> Option<IncomingMessage> {
    let msg = update.message.as_ref()?;
    let text = msg.text.as_ref()?;

    if msg.from.as_ref().is_some_and(|user| user.is_bot) {
        return None;
    }

    let sender_id = msg
        .from
        .as_ref()
        .map_or_else(|| msg.chat.id.to_string(), |user| user.id.to_string());

    let sender_name = msg
        .from
        .as_ref()
        .map_or_else(|| "Unknown".to_string(), |user| user.first_name.clone());

    Some(IncomingMessage {
        id: msg.message_id.to_string(),
        conversation_id: format!("telegram:{}", msg.chat.id),
        sender_id,
        sender_name,
        content: text.clone(),
        is_dm: msg.chat.chat_type == "private",
        timestamp: DateTime::from_timestamp(msg.date, 0).unwrap_or_else(Utc::now),
    })
}
