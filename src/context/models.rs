//! Data models for context assembly

use super::token_budget::Budget;
use super::usage::TokenUsageMap;
use crate::citations::Citation;
use crate::config::Specialization;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author role of a prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Role-tagged prompt message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(rename = "content")]
    pub text: String,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Who wrote a chat log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorRole {
    User,
    Bot,
}

/// Kind of chat log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatEntryType {
    /// Conversational message
    Message,
    /// Plan proposed by the bot
    Plan,
    /// Informational note (e.g. a document was imported); never enters the prompt
    Document,
}

impl ChatEntryType {
    pub fn is_conversational(&self) -> bool {
        !matches!(self, ChatEntryType::Document)
    }
}

/// Persisted chat log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: String,
    pub chat_id: String,
    pub user_name: String,
    pub content: String,
    pub author_role: AuthorRole,
    pub entry_type: ChatEntryType,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(
        chat_id: impl Into<String>,
        user_name: impl Into<String>,
        content: impl Into<String>,
        author_role: AuthorRole,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            user_name: user_name.into(),
            content: content.into(),
            author_role,
            entry_type: ChatEntryType::Message,
            timestamp,
        }
    }

    pub fn with_type(mut self, entry_type: ChatEntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    /// Prompt role for this entry
    pub fn prompt_role(&self) -> Role {
        match self.author_role {
            AuthorRole::User => Role::User,
            AuthorRole::Bot => Role::Assistant,
        }
    }

    /// Role-prefixed, timestamped line used in the prompt
    pub fn to_formatted_string(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.user_name,
            self.content
        )
    }
}

/// Everything the model call needs for one turn
///
/// Built once per turn and consumed by the model call.
#[derive(Debug, Clone)]
pub struct ConversationTurnContext {
    pub chat_id: String,
    /// Specialization named by the chat session, whether or not it has a stored record
    pub specialization_id: Option<String>,
    pub specialization: Option<Specialization>,
    pub system_instructions: String,
    pub audience: String,
    pub user_intent: Option<String>,
    pub memory_text: String,
    /// Citations returned with the memory text, in retrieval order
    pub memory_citations: Vec<Citation>,
    pub allotted_history: String,
    pub messages: Vec<Message>,
    pub budget: Budget,
    pub token_usage: TokenUsageMap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_formatted_entry() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap();
        let entry = ChatEntry::new("chat-1", "alice", "hello there", AuthorRole::User, timestamp);
        assert_eq!(entry.to_formatted_string(), "[2024-03-05 14:07] alice: hello there");
        assert_eq!(entry.prompt_role(), Role::User);
    }

    #[test]
    fn test_document_entries_are_not_conversational() {
        assert!(ChatEntryType::Message.is_conversational());
        assert!(ChatEntryType::Plan.is_conversational());
        assert!(!ChatEntryType::Document.is_conversational());
    }

    #[test]
    fn test_message_serializes_as_chat_message() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }
}
