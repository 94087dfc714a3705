//! Per-operation token accounting

use super::token_estimator::TokenEstimator;
use indexmap::IndexMap;
use std::sync::Arc;

/// Operation name to consumed tokens, in first-recorded order
pub type TokenUsageMap = IndexMap<String, usize>;

pub const AUDIENCE_EXTRACTION: &str = "audienceExtraction";
pub const USER_INTENT_EXTRACTION: &str = "userIntentExtraction";
pub const SYSTEM_PROMPT: &str = "metaPromptTemplate";
pub const RESPONSE_COMPLETION: &str = "responseCompletion";

/// Records token usage for the named steps of one turn
pub struct TokenAccountant {
    usage: TokenUsageMap,
    estimator: Arc<dyn TokenEstimator>,
}

impl TokenAccountant {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self::with_usage(estimator, TokenUsageMap::new())
    }

    /// Continue accounting from an earlier snapshot
    pub fn with_usage(estimator: Arc<dyn TokenEstimator>, usage: TokenUsageMap) -> Self {
        Self { usage, estimator }
    }

    /// Record an operation; recording the same name again overwrites it
    pub fn record(&mut self, operation: impl Into<String>, tokens: usize) {
        self.usage.insert(operation.into(), tokens);
    }

    pub fn snapshot(&self) -> TokenUsageMap {
        self.usage.clone()
    }

    /// Add the completion text's own cost and return the final map
    pub fn finalize(&mut self, content: &str) -> TokenUsageMap {
        let tokens = self.estimator.estimate(content);
        self.record(RESPONSE_COMPLETION, tokens);
        self.snapshot()
    }
}
