//! Per-conversation message history with bounded length and idle expiry

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A platform user
    User,
    /// The model
    Assistant,
}

/// A single conversation turn
///
/// Immutable once created; the processor merges several of these into one
/// logical turn before calling the model.
#[derive(Debug, Clone)]
pub struct Message {
    /// Platform-scoped conversation id (e.g. `discord:1234`)
    pub conversation_id: String,

    /// Display name of the sender; `assistant` for model output
    pub sender: String,

    /// Who produced the message
    pub role: Role,

    /// Message text
    pub text: String,

    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a user message stamped now
    #[must_use]
    pub fn user(conversation_id: &str, sender: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            role: Role::User,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant message stamped now
    #[must_use]
    pub fn assistant(conversation_id: &str, text: String) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            sender: "assistant".to_string(),
            role: Role::Assistant,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// One conversation's bounded history
struct ContextEntry {
    messages: VecDeque<Message>,
    last_activity: Instant,
}

impl ContextEntry {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }
}

/// Shared store of per-conversation contexts
///
/// Entries are created lazily on first use and trimmed to the configured
/// bound on every append. Eviction of idle entries is driven by the
/// processor's cleanup sweep, which coordinates with in-flight flushes.
pub struct ContextStore {
    max_messages: usize,
    idle_ttl: Duration,
    inner: Mutex<HashMap<String, ContextEntry>>,
}

impl ContextStore {
    /// Create a store bounding each history to `max_messages` entries
    #[must_use]
    pub fn new(max_messages: usize, idle_ttl: Duration) -> Self {
        Self {
            max_messages,
            idle_ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Return the conversation's history, creating an empty context on first use.
    ///
    /// Refreshes the entry's last-activity timestamp.
    #[must_use]
    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        let mut map = self.lock();
        let entry = map
            .entry(conversation_id.to_string())
            .or_insert_with(ContextEntry::new);
        entry.last_activity = Instant::now();
        entry.messages.iter().cloned().collect()
    }

    /// Append a message, trimming the oldest entries beyond the bound
    pub fn append(&self, conversation_id: &str, message: Message) {
        let mut map = self.lock();
        let entry = map
            .entry(conversation_id.to_string())
            .or_insert_with(ContextEntry::new);
        entry.messages.push_back(message);
        while entry.messages.len() > self.max_messages {
            entry.messages.pop_front();
        }
        entry.last_activity = Instant::now();
    }

    /// Drop the conversation's context. Returns whether one existed.
    pub fn remove(&self, conversation_id: &str) -> bool {
        self.lock().remove(conversation_id).is_some()
    }

    /// Whether a context exists for the conversation
    #[must_use]
    pub fn contains(&self, conversation_id: &str) -> bool {
        self.lock().contains_key(conversation_id)
    }

    /// Number of live contexts
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no contexts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Conversation ids whose last activity is older than the idle TTL
    #[must_use]
    pub fn stale(&self) -> Vec<String> {
        let map = self.lock();
        map.iter()
            .filter(|(_, entry)| entry.last_activity.elapsed() > self.idle_ttl)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ContextEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
