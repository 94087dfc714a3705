//! In-process chat store

use super::models::{BotAnswer, ChatSession};
use super::ChatStore;
use crate::config::Specialization;
use crate::context::ChatEntry;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Chat store backed by concurrent maps
#[derive(Default)]
pub struct InMemoryChatStore {
    sessions: DashMap<String, ChatSession>,
    entries: DashMap<String, Vec<ChatEntry>>,
    specializations: DashMap<String, Specialization>,
    answers: DashMap<String, Vec<BotAnswer>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, session: ChatSession) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn add_entry(&self, entry: ChatEntry) {
        self.entries.entry(entry.chat_id.clone()).or_default().push(entry);
    }

    pub fn add_specialization(&self, specialization: Specialization) {
        self.specializations.insert(specialization.id.clone(), specialization);
    }

    /// Answers saved for a chat, oldest first
    pub fn answers(&self, chat_id: &str) -> Vec<BotAnswer> {
        self.answers
            .get(chat_id)
            .map(|a| a.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn find_session(&self, chat_id: &str) -> Result<Option<ChatSession>> {
        Ok(self.sessions.get(chat_id).map(|s| s.value().clone()))
    }

    async fn find_messages(&self, chat_id: &str, skip: usize, count: usize) -> Result<Vec<ChatEntry>> {
        let mut entries = self
            .entries
            .get(chat_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries.into_iter().skip(skip).take(count).collect())
    }

    async fn find_specialization(&self, id: &str) -> Result<Option<Specialization>> {
        Ok(self.specializations.get(id).map(|s| s.value().clone()))
    }

    async fn save_message(&self, entry: &ChatEntry) -> Result<()> {
        self.add_entry(entry.clone());
        Ok(())
    }

    async fn save_answer(&self, answer: &BotAnswer) -> Result<()> {
        self.answers
            .entry(answer.chat_id.clone())
            .or_default()
            .push(answer.clone());
        Ok(())
    }
}
