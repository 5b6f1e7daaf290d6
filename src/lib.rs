//! relaybot - Discord and Telegram relay bot for LLM chat completions
//!
//! This library provides the core functionality for the relay bot:
//! - Message batching and per-conversation flush pipeline
//! - Bounded conversation context with idle expiry
//! - Chat-completion client
//! - Messaging channel adapters
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Platforms                    │
//! │          Discord   │   Telegram              │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────┐
//! │                  Daemon                      │
//! │   Channels  │  Commands  │  Cleanup sweep   │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────┐
//! │             Message Processor                │
//! │   Batching  │  Context  │  Completion API   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod processor;

pub use config::Config;
pub use context::{ContextStore, Message, Role};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use llm::{ChatMessage, CompletionApi, LlmClient};
pub use processor::{MessageProcessor, Reply, ReplySink, Status};
