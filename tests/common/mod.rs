//! Shared test mocks
//!
//! `MockApi` stands in for the completion endpoint and records every call;
//! `RecordingSink` captures processor deliveries. Tests set each message's
//! sender to the conversation key so the mock can attribute concurrent calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relaybot::{ChatMessage, CompletionApi, Config, Error, Reply, ReplySink};

/// How a `MockApi` responds to calls
pub enum MockBehavior {
    /// Always reply with the given text
    Reply(String),
    /// Always fail with a transient API error
    Fail,
    /// Sleep `slow` on the first call, reply fast afterwards
    SlowFirst { slow: Duration },
}

/// One recorded completion call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Conversation key extracted from the final user turn
    pub key: String,
    /// `(role, content)` pairs as sent to the API
    pub messages: Vec<(String, String)>,
}

/// Completion backend that records calls and tracks concurrency
pub struct MockApi {
    behavior: MockBehavior,
    delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
    call_times: Mutex<Vec<Instant>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak_per_key: Mutex<HashMap<String, usize>>,
    global_in_flight: Mutex<usize>,
    global_peak: Mutex<usize>,
}

impl MockApi {
    pub fn new(behavior: MockBehavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay,
            calls: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            peak_per_key: Mutex::new(HashMap::new()),
            global_in_flight: Mutex::new(0),
            global_peak: Mutex::new(0),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new(MockBehavior::Reply(text.to_string()), Duration::ZERO)
    }

    pub fn replying_after(text: &str, delay: Duration) -> Arc<Self> {
        Self::new(MockBehavior::Reply(text.to_string()), delay)
    }

    pub fn failing() -> Arc<Self> {
        Self::new(MockBehavior::Fail, Duration::ZERO)
    }

    pub fn slow_first(slow: Duration) -> Arc<Self> {
        Self::new(MockBehavior::SlowFirst { slow }, Duration::ZERO)
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Highest number of concurrent calls observed for one conversation key
    pub fn peak_for(&self, key: &str) -> usize {
        self.peak_per_key.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Highest number of concurrent calls observed across all conversations
    pub fn global_peak(&self) -> usize {
        *self.global_peak.lock().unwrap()
    }
}

/// Extract the conversation key from the final user turn (`key: text` lines)
fn conversation_key(messages: &[ChatMessage]) -> String {
    messages
        .last()
        .and_then(|m| m.content.split(':').next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl CompletionApi for MockApi {
    async fn complete(&self, messages: &[ChatMessage]) -> relaybot::Result<String> {
        let key = conversation_key(messages);
        self.call_times.lock().unwrap().push(Instant::now());

        let first_call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                key: key.clone(),
                messages: messages
                    .iter()
                    .map(|m| (m.role.to_string(), m.content.clone()))
                    .collect(),
            });
            calls.len() == 1
        };

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(key.clone()).or_insert(0);
            *count += 1;
            let mut peaks = self.peak_per_key.lock().unwrap();
            let peak = peaks.entry(key.clone()).or_insert(0);
            *peak = (*peak).max(*count);

            let mut global = self.global_in_flight.lock().unwrap();
            *global += 1;
            let mut global_peak = self.global_peak.lock().unwrap();
            *global_peak = (*global_peak).max(*global);
        }

        let delay = match &self.behavior {
            MockBehavior::SlowFirst { slow } if first_call => *slow,
            _ => self.delay,
        };
        tokio::time::sleep(delay).await;

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(count) = in_flight.get_mut(&key) {
                *count -= 1;
            }
            let mut global = self.global_in_flight.lock().unwrap();
            *global -= 1;
        }

        match &self.behavior {
            MockBehavior::Fail => Err(Error::Api("mock failure".to_string())),
            MockBehavior::Reply(text) => Ok(text.clone()),
            MockBehavior::SlowFirst { .. } => Ok("recovered".to_string()),
        }
    }
}

/// Delivery sink that records every reply
#[derive(Default)]
pub struct RecordingSink {
    replies: Mutex<Vec<(String, Reply)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<(String, Reply)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    /// Poll until at least `n` replies have been delivered
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count() >= n
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn deliver(&self, conversation_id: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), reply));
    }
}

/// Baseline processor configuration for tests; override fields as needed
pub fn test_config() -> Config {
    Config {
        api_key: "test-key".to_string(),
        discord_token: Some("discord-token".to_string()),
        telegram_token: None,
        api_base_url: "http://localhost:0".to_string(),
        model_name: "test-model".to_string(),
        max_context_messages: 20,
        message_batch_size: 5,
        batch_debounce: Duration::from_millis(50),
        processing_timeout: Duration::from_secs(5),
        rate_limit_delay: Duration::ZERO,
        max_response_length: 2000,
        context_cleanup_interval: Duration::from_secs(300),
        context_idle_ttl: Duration::from_secs(1800),
        system_prompt: "test prompt".to_string(),
    }
}
