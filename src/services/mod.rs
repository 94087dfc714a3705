//! External collaborators
//!
//! The core talks to storage, memory retrieval, the model and client delivery
//! only through these traits. Reference implementations:
//! - `openai`: OpenAI-compatible chat completions over HTTP (JSON and SSE)
//! - `memory_store`: in-process chat store
//! - `broadcast`: in-process publish/subscribe fan-out

pub mod broadcast;
pub mod memory_store;
pub mod models;
pub mod openai;

pub use broadcast::{BroadcastPublisher, PublishedEvent};
pub use memory_store::InMemoryChatStore;
pub use models::{
    BotAnswer, ChatSession, Completion, CompletionSettings, CompletionUsage, MemoryResult,
};
pub use openai::OpenAiClient;

use crate::citations::Fragment;
use crate::config::Specialization;
use crate::context::{ChatEntry, Message};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy, finite sequence of answer fragments
pub type FragmentStream = BoxStream<'static, Result<Fragment>>;

/// Chat session and message storage
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_session(&self, chat_id: &str) -> Result<Option<ChatSession>>;

    /// Entries of a chat, newest first
    async fn find_messages(&self, chat_id: &str, skip: usize, count: usize) -> Result<Vec<ChatEntry>>;

    async fn find_specialization(&self, id: &str) -> Result<Option<Specialization>>;

    async fn save_message(&self, entry: &ChatEntry) -> Result<()>;

    async fn save_answer(&self, answer: &BotAnswer) -> Result<()>;
}

/// Embedding-backed memory retrieval
#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    /// Relevant memory text that fits `token_budget`
    async fn query(&self, query: &str, chat_id: &str, token_budget: usize) -> Result<MemoryResult>;
}

/// Language model
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[Message], settings: &CompletionSettings) -> Result<Completion>;

    async fn complete_streaming(
        &self,
        messages: &[Message],
        settings: &CompletionSettings,
    ) -> Result<FragmentStream>;
}

/// Real-time delivery to clients, fire-and-forget
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, conversation_id: &str, event: &str, payload: serde_json::Value);
}
