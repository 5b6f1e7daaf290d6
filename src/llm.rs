//! Chat-completion client
//!
//! Thin request/response wrapper around an OpenAI-style `/chat/completions`
//! endpoint. The processor owns the per-call timeout; the client only keeps a
//! coarse transport timeout so a dead connection cannot pin a flush forever.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{Message, Role};
use crate::{Error, Result};

/// Transport-level timeout for completion requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Max tokens requested per completion
const MAX_TOKENS: u32 = 500;

/// Sampling temperature
const TEMPERATURE: f32 = 0.7;

/// A role-tagged message in completion wire format
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Wire role: `system`, `user`, or `assistant`
    pub role: &'static str,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a `system` message
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self {
            role: "system",
            content: content.to_string(),
        }
    }

    /// Convert a stored conversation message into wire format.
    ///
    /// User turns are already rendered as `sender: text` lines when the
    /// processor merges a batch, so the text passes through unchanged.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            role: match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: message.text.clone(),
        }
    }
}

/// Abstraction over the completion endpoint
///
/// The processor only depends on this trait; tests substitute an in-process
/// implementation.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Request a completion for the given message sequence
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] on transport failures or error statuses and
    /// [`Error::MalformedResponse`] when the payload cannot be interpreted.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// HTTP client for the completion endpoint
pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    /// Create a client for the given endpoint and model
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionApi for LlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            stream: false,
        };

        tracing::debug!(model = %self.model, messages = messages.len(), "requesting completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Api(format!("completion request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!(
                "completion endpoint returned {status}: {body}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Api(format!("completion response read failed: {e}")))?;

        let parsed: CompletionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::MalformedResponse(format!("invalid completion payload: {e}")))?;

        let content = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| {
                Error::MalformedResponse("completion payload has no choices".to_string())
            })?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_maps_roles() {
        let user = ChatMessage::from_message(&Message::user("c", "alice", "alice: hi"));
        assert_eq!(user.role, "user");
        assert_eq!(user.content, "alice: hi");

        let reply = ChatMessage::from_message(&Message::assistant("c", "hello".to_string()));
        assert_eq!(reply.role, "assistant");
        assert_eq!(reply.content, "hello");
    }

    #[test]
    fn completion_response_parses_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  hi there \n"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        let content = parsed.choices[0].message.content.as_deref().unwrap();
        assert_eq!(content.trim(), "hi there");
    }

    #[test]
    fn completion_response_tolerates_missing_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn empty_choices_is_malformed() {
        let body = r#"{"choices":[]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.choices.first().is_none());
    }
}
