//! Token estimation using tiktoken

use super::models::{Message, Role};
use crate::error::{ContextError, Result};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Fixed per-message overhead of the chat-completions message format
pub const TOKENS_PER_MESSAGE: usize = 3;

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate a role-tagged message including the per-message overhead
    fn estimate_message(&self, role: Role, text: &str) -> usize {
        TOKENS_PER_MESSAGE + self.estimate(role.as_str()) + self.estimate(text)
    }

    /// Sum of role-tagged estimates over an ordered message list
    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate_message(m.role, &m.text))
            .sum()
    }
}

/// Tiktoken-based token estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
#[derive(Clone)]
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| {
            ContextError::Configuration(format!("Failed to load cl100k_base encoding: {}", e))
        })?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Word-based token estimator (fallback, ~1.3 tokens per word)
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_estimator() {
        let estimator = TiktokenEstimator::new().unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = estimator.estimate(text);
        assert!(tokens > 0);
        assert!(tokens < 20); // Should be around 8-10 tokens
        assert_eq!(estimator.estimate(""), 0);
    }

    #[test]
    fn test_word_based_estimator() {
        let estimator = WordBasedEstimator::default();
        let text = "Hello world test";
        let tokens = estimator.estimate(text);
        assert_eq!(tokens, 4); // 3 words * 1.3 = 3.9 -> 4
    }

    #[test]
    fn test_message_estimate_adds_overhead() {
        let estimator = WordBasedEstimator::new(1.0);
        // 3 overhead + 1 for "user" + 2 words
        assert_eq!(estimator.estimate_message(Role::User, "hello world"), 6);
        assert_eq!(estimator.estimate_message(Role::System, ""), 4);
    }

    #[test]
    fn test_estimate_messages_sums_in_order() {
        let estimator = WordBasedEstimator::new(1.0);
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        assert_eq!(estimator.estimate_messages(&messages), 6 + 5);
        assert_eq!(estimator.estimate_messages(&[]), 0);
    }

    #[test]
    fn test_deterministic() {
        let estimator = TiktokenEstimator::new().unwrap();
        let text = "The same text always costs the same.";
        assert_eq!(estimator.estimate(text), estimator.estimate(text));
    }
}
