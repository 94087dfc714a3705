//! Data exchanged with external collaborators

use crate::citations::{Citation, CitationEvent};
use crate::context::TokenUsageMap;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Chat session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub specialization_id: Option<String>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            specialization_id: None,
        }
    }

    pub fn with_specialization(mut self, specialization_id: impl Into<String>) -> Self {
        self.specialization_id = Some(specialization_id.into());
        self
    }
}

/// Memory text plus its citations, keyed by source identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryResult {
    pub text: String,
    pub citations: IndexMap<String, Citation>,
}

/// Settings for one model call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionSettings {
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Token usage reported by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Non-streaming completion result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<CompletionUsage>,
    /// Citation events carried with the message
    pub citations: Vec<CitationEvent>,
}

/// Persisted bot answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotAnswer {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    /// Sources referenced by the streamed answer
    pub citations: Vec<Citation>,
    /// Sources behind the memory text the prompt was built with
    #[serde(default)]
    pub memory_citations: Vec<Citation>,
    /// Serialized `TokenUsageMap`
    pub token_usage: String,
    /// False when the stream was cancelled before completing
    pub finalized: bool,
    pub timestamp: DateTime<Utc>,
}

impl BotAnswer {
    pub fn new(
        chat_id: impl Into<String>,
        content: impl Into<String>,
        citations: Vec<Citation>,
        token_usage: &TokenUsageMap,
        finalized: bool,
    ) -> crate::error::Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            content: content.into(),
            citations,
            memory_citations: Vec::new(),
            token_usage: serde_json::to_string(token_usage)?,
            finalized,
            timestamp: Utc::now(),
        })
    }

    pub fn with_memory_citations(mut self, memory_citations: Vec<Citation>) -> Self {
        self.memory_citations = memory_citations;
        self
    }

    pub fn token_usage_map(&self) -> crate::error::Result<TokenUsageMap> {
        Ok(serde_json::from_str(&self.token_usage)?)
    }
}
