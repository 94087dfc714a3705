//! Chat history allotment under a token budget

use super::models::{ChatEntry, Message};
use super::token_estimator::TokenEstimator;
use std::sync::Arc;
use tracing::debug;

/// History that fit into the budget
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllottedHistory {
    /// Formatted lines, oldest first
    pub text: String,
    /// Role-tagged messages, oldest first
    pub messages: Vec<Message>,
    pub tokens_used: i64,
}

impl AllottedHistory {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Fits the most recent chat entries into a token budget
pub struct ChatHistoryAllotter {
    estimator: Arc<dyn TokenEstimator>,
}

impl ChatHistoryAllotter {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    /// Allot history from a newest-first log
    ///
    /// At most `max_messages` entries are considered. Informational entries are
    /// skipped. Scanning stops at the first entry that does not fit, even if
    /// older entries would.
    pub fn allot(&self, entries: &[ChatEntry], budget: i64, max_messages: usize) -> AllottedHistory {
        let mut remaining = budget;
        let mut lines: Vec<String> = Vec::new();
        let mut messages = Vec::new();

        for entry in entries
            .iter()
            .take(max_messages)
            .filter(|e| e.entry_type.is_conversational())
        {
            let formatted = entry.to_formatted_string();
            let role = entry.prompt_role();
            let cost = self.estimator.estimate_message(role, &formatted) as i64;

            if remaining - cost < 0 {
                debug!(
                    "History allotment stopped: entry costs {} tokens, {} remaining",
                    cost, remaining
                );
                break;
            }

            remaining -= cost;
            lines.push(formatted.clone());
            messages.push(Message::new(role, formatted));
        }

        // Collected newest first; hand back chronological order
        lines.reverse();
        messages.reverse();

        AllottedHistory {
            text: lines.join("\n"),
            messages,
            tokens_used: budget - remaining,
        }
    }
}
