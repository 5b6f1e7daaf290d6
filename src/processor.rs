//! Message batching and flush pipeline
//!
//! The processor accumulates inbound messages into a per-conversation pending
//! batch, flushes the batch to the completion API when it reaches the
//! configured size or the debounce window closes, and pushes the outcome to a
//! delivery sink. A conversation-scoped async lock guarantees at most one
//! in-flight completion call per conversation; a shared cooperative rate
//! limiter spaces calls across all conversations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::Config;
use crate::context::{ContextStore, Message};
use crate::llm::{ChatMessage, CompletionApi};

/// User-facing notice when the model takes longer than the processing timeout
const TIMEOUT_NOTICE: &str = "Sorry, I'm taking too long to respond. Please try again!";

/// User-facing notice when the completion API fails
const FAILURE_NOTICE: &str =
    "Sorry, I'm having trouble generating a response right now. Please try again!";

/// Appended to the configured system prompt on every request
const FORMATTING_INSTRUCTIONS: &str = "\n\nIMPORTANT: Use only basic markdown formatting that works across platforms: \
    use *bold* for emphasis, `code` for inline code or technical terms, bullet points with - for lists, \
    and [text](url) for links. Avoid complex formatting, special characters, or platform-specific syntax.";

/// Outcome of a flush, pushed to the platform layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Assistant response, already truncated for delivery
    Text(String),
    /// User-facing notice that the flush failed
    Error(String),
}

impl Reply {
    /// The text to put on the wire, for either variant
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Text(text) | Self::Error(text) => text,
        }
    }
}

/// Receives processor output for delivery back to the originating platform
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Deliver a reply or error notice to the conversation
    async fn deliver(&self, conversation_id: &str, reply: Reply);
}

/// Processor snapshot reported by the `status` command
#[derive(Debug, Clone, Copy)]
pub struct Status {
    /// Time since the processor was created
    pub uptime: Duration,
    /// Number of conversations with live context
    pub active_conversations: usize,
}

/// Pending-batch lifecycle for one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Idle,
    Accumulating,
    Flushing,
}

/// Per-conversation batch bookkeeping
///
/// The flush lock lives here and is never dropped while a flush may hold it;
/// the cleanup sweep removes an entry only after try-locking it.
struct Conversation {
    batch: Vec<Message>,
    state: BatchState,
    first_pending: Option<Instant>,
    flush_lock: Arc<tokio::sync::Mutex<()>>,
    wake: Arc<Notify>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            batch: Vec::new(),
            state: BatchState::Idle,
            first_pending: None,
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
            wake: Arc::new(Notify::new()),
        }
    }
}

/// Cooperative spacing between outbound completion calls
///
/// Holding the async mutex across the wait serializes acquirers, so calls
/// start at least `min_delay` apart regardless of which conversation they
/// belong to.
struct RateLimiter {
    min_delay: Duration,
    last_call: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_call: tokio::sync::Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// The message processing core
///
/// Cheap to clone; all state lives behind a shared inner.
#[derive(Clone)]
pub struct MessageProcessor {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn CompletionApi>,
    sink: Arc<dyn ReplySink>,
    contexts: ContextStore,
    conversations: Mutex<HashMap<String, Conversation>>,
    limiter: RateLimiter,
    batch_size: usize,
    debounce: Duration,
    processing_timeout: Duration,
    max_response_length: usize,
    system_prompt: String,
    started: Instant,
}

impl MessageProcessor {
    /// Create a processor wired to the given completion API and delivery sink
    #[must_use]
    pub fn new(config: &Config, api: Arc<dyn CompletionApi>, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                sink,
                contexts: ContextStore::new(config.max_context_messages, config.context_idle_ttl),
                conversations: Mutex::new(HashMap::new()),
                limiter: RateLimiter::new(config.rate_limit_delay),
                batch_size: config.message_batch_size.max(1),
                debounce: config.batch_debounce,
                processing_timeout: config.processing_timeout,
                max_response_length: config.max_response_length,
                system_prompt: format!("{}{}", config.system_prompt, FORMATTING_INSTRUCTIONS),
                started: Instant::now(),
            }),
        }
    }

    /// Append a message to the conversation's pending batch.
    ///
    /// Never blocks beyond brief map locking. Spawns the conversation's flush
    /// driver if it is idle, and wakes it early when the batch reaches the
    /// size trigger.
    pub fn submit(&self, conversation_id: &str, message: Message) {
        let start_driver = {
            let mut map = self.inner.lock_conversations();
            let conversation = map
                .entry(conversation_id.to_string())
                .or_insert_with(Conversation::new);
            conversation.batch.push(message);
            if conversation.first_pending.is_none() {
                conversation.first_pending = Some(Instant::now());
            }
            if conversation.batch.len() >= self.inner.batch_size {
                conversation.wake.notify_one();
            }
            if conversation.state == BatchState::Idle {
                conversation.state = BatchState::Accumulating;
                true
            } else {
                false
            }
        };

        tracing::debug!(conversation = conversation_id, "message queued");

        if start_driver {
            let inner = Arc::clone(&self.inner);
            let id = conversation_id.to_string();
            tokio::spawn(async move {
                inner.drive(id).await;
            });
        }
    }

    /// Drop the conversation's context and any pending batch. Idempotent.
    ///
    /// Returns whether anything was dropped. An in-flight flush is unaffected;
    /// its result is delivered but the messages cleared here never reach a
    /// later flush.
    pub fn clear(&self, conversation_id: &str) -> bool {
        let mut dropped = self.inner.contexts.remove(conversation_id);
        {
            let mut map = self.inner.lock_conversations();
            if let Some(conversation) = map.get_mut(conversation_id) {
                if !conversation.batch.is_empty() {
                    conversation.batch.clear();
                    conversation.first_pending = None;
                    dropped = true;
                }
            }
        }
        if dropped {
            tracing::info!(conversation = conversation_id, "conversation cleared");
        }
        dropped
    }

    /// Processor snapshot for the `status` command
    #[must_use]
    pub fn status(&self) -> Status {
        Status {
            uptime: self.inner.started.elapsed(),
            active_conversations: self.inner.contexts.len(),
        }
    }

    /// Evict conversations idle for longer than the configured TTL.
    ///
    /// A conversation is skipped while its flush lock is held or a batch is
    /// pending, so a context can never disappear under an in-flight flush.
    pub fn cleanup_idle(&self) {
        self.inner.cleanup_idle();
    }
}

impl Inner {
    /// Flush driver for one conversation.
    ///
    /// Runs while the conversation has pending messages: waits for the size
    /// trigger or the debounce deadline, takes up to one batch, flushes it
    /// under the conversation lock, and loops to pick up messages that
    /// arrived mid-flush.
    async fn drive(self: Arc<Self>, conversation_id: String) {
        loop {
            let waiter = {
                let map = self.lock_conversations();
                let Some(conversation) = map.get(&conversation_id) else {
                    return;
                };
                conversation.first_pending.map(|first| {
                    (
                        Arc::clone(&conversation.wake),
                        tokio::time::Instant::from_std(first + self.debounce),
                    )
                })
            };

            if let Some((wake, deadline)) = waiter {
                tokio::select! {
                    () = wake.notified() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }

            let (batch, flush_lock) = {
                let mut map = self.lock_conversations();
                let Some(conversation) = map.get_mut(&conversation_id) else {
                    return;
                };
                if conversation.batch.is_empty() {
                    conversation.state = BatchState::Idle;
                    conversation.first_pending = None;
                    return;
                }
                conversation.state = BatchState::Flushing;
                let take = conversation.batch.len().min(self.batch_size);
                let batch: Vec<Message> = conversation.batch.drain(..take).collect();
                // Fresh wake handle; a stored size-trigger permit must not
                // fire for the next batch
                conversation.wake = Arc::new(Notify::new());
                if conversation.batch.is_empty() {
                    conversation.first_pending = None;
                } else {
                    // Leftover messages start a fresh debounce window
                    conversation.first_pending = Some(Instant::now());
                    if conversation.batch.len() >= self.batch_size {
                        conversation.wake.notify_one();
                    }
                }
                (batch, Arc::clone(&conversation.flush_lock))
            };

            let guard = flush_lock.lock().await;
            self.flush(&conversation_id, batch).await;
            drop(guard);

            let mut map = self.lock_conversations();
            let Some(conversation) = map.get_mut(&conversation_id) else {
                return;
            };
            if conversation.batch.is_empty() {
                conversation.state = BatchState::Idle;
                conversation.first_pending = None;
                return;
            }
            conversation.state = BatchState::Accumulating;
        }
    }

    /// Send one merged batch to the completion API and deliver the outcome.
    ///
    /// The merged user turn is appended to context whether or not the call
    /// succeeds; the assistant reply is appended only on success. A failed
    /// flush is not retried.
    async fn flush(&self, conversation_id: &str, batch: Vec<Message>) {
        let Some(turn) = merge_batch(batch) else {
            return;
        };

        let history = self.contexts.history(conversation_id);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        messages.extend(history.iter().map(ChatMessage::from_message));
        messages.push(ChatMessage::from_message(&turn));

        self.limiter.acquire().await;

        tracing::debug!(
            conversation = conversation_id,
            context = history.len(),
            "flushing batch"
        );

        let outcome =
            tokio::time::timeout(self.processing_timeout, self.api.complete(&messages)).await;

        self.contexts.append(conversation_id, turn);

        match outcome {
            Ok(Ok(text)) => {
                let text = truncate_response(&text, self.max_response_length);
                self.contexts.append(
                    conversation_id,
                    Message::assistant(conversation_id, text.clone()),
                );
                self.sink.deliver(conversation_id, Reply::Text(text)).await;
            }
            Ok(Err(e)) => {
                tracing::error!(conversation = conversation_id, error = %e, "completion failed");
                self.sink
                    .deliver(conversation_id, Reply::Error(FAILURE_NOTICE.to_string()))
                    .await;
            }
            Err(_) => {
                tracing::warn!(conversation = conversation_id, "completion timed out");
                self.sink
                    .deliver(conversation_id, Reply::Error(TIMEOUT_NOTICE.to_string()))
                    .await;
            }
        }
    }

    /// Evict conversations idle for longer than the configured TTL
    fn cleanup_idle(&self) {
        let stale = self.contexts.stale();
        let mut map = self.lock_conversations();
        let mut evicted = 0usize;

        for id in stale {
            let safe = map.get(&id).is_none_or(|conversation| {
                conversation.state == BatchState::Idle
                    && conversation.batch.is_empty()
                    && conversation.flush_lock.try_lock().is_ok()
            });
            if safe {
                self.contexts.remove(&id);
                map.remove(&id);
                evicted += 1;
            }
        }

        // Bookkeeping for conversations whose context is already gone
        map.retain(|id, conversation| {
            conversation.state != BatchState::Idle
                || !conversation.batch.is_empty()
                || self.contexts.contains(id)
        });

        if evicted > 0 {
            tracing::info!(
                evicted,
                remaining = self.contexts.len(),
                "idle conversations cleaned up"
            );
        }
    }

    fn lock_conversations(&self) -> std::sync::MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Merge a batch into one logical user turn, preserving arrival order.
///
/// Each message renders as a `sender: text` line; the merged turn carries the
/// metadata of the newest message.
fn merge_batch(batch: Vec<Message>) -> Option<Message> {
    let last = batch.last()?;
    let text = batch
        .iter()
        .map(|message| format!("{}: {}", message.sender, message.text))
        .collect::<Vec<_>>()
        .join("\n");
    Some(Message {
        conversation_id: last.conversation_id.clone(),
        sender: last.sender.clone(),
        role: last.role,
        text,
        timestamp: last.timestamp,
    })
}

/// Cap response length in characters, marking the cut with an ellipsis
fn truncate_response(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_length.saturating_sub(3)).collect();
    format!("{kept}...")
}
