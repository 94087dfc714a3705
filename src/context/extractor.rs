//! Audience and user-intent extraction
//!
//! Both are short model calls over the recent history. They are optional
//! refinements of the prompt: callers wrap them in [`try_or_default`] so a
//! failure leaves the field empty instead of failing the turn.

use super::history::ChatHistoryAllotter;
use super::models::{ChatEntry, Message, Role};
use super::token_estimator::TokenEstimator;
use crate::config::{PromptOptions, Specialization};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::services::{ChatCompletion, CompletionSettings};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Await `operation`; on failure log it and return `fallback`
pub async fn try_or_default<T, E, F>(operation: &str, future: F, fallback: T) -> T
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    match future.await {
        Ok(value) => value,
        Err(e) => {
            warn!("{} failed, continuing without it: {}", operation, e);
            METRICS.record_extraction_fallback(operation);
            fallback
        }
    }
}

/// Text produced by an extraction call and the tokens it consumed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub tokens: usize,
}

/// Runs audience / intent extraction against the model
pub struct SemanticExtractor {
    model: Arc<dyn ChatCompletion>,
    estimator: Arc<dyn TokenEstimator>,
}

impl SemanticExtractor {
    pub fn new(model: Arc<dyn ChatCompletion>, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { model, estimator }
    }

    /// Comma separated list of the chat's participants
    pub async fn extract_audience(
        &self,
        history: &[ChatEntry],
        options: &PromptOptions,
        specialization: Option<&Specialization>,
    ) -> Result<Extraction> {
        self.extract(
            &options.system_audience,
            &options.system_audience_continuation,
            history,
            options,
            specialization,
        )
        .await
    }

    /// The last message rewritten to stand on its own
    pub async fn extract_user_intent(
        &self,
        history: &[ChatEntry],
        options: &PromptOptions,
        specialization: Option<&Specialization>,
    ) -> Result<Extraction> {
        self.extract(
            &options.system_intent,
            &options.system_intent_continuation,
            history,
            options,
            specialization,
        )
        .await
    }

    async fn extract(
        &self,
        instructions: &str,
        continuation: &str,
        history: &[ChatEntry],
        options: &PromptOptions,
        specialization: Option<&Specialization>,
    ) -> Result<Extraction> {
        let response_limit = options.response_limit_for(specialization);
        let fixed_cost = self.estimator.estimate_message(Role::System, instructions)
            + self.estimator.estimate_message(Role::User, continuation);
        let budget = options.completion_token_limit - response_limit - fixed_cost as i64;

        let allotted = ChatHistoryAllotter::new(self.estimator.clone()).allot(
            history,
            budget,
            options.past_messages_for(specialization),
        );

        let prompt = if allotted.text.is_empty() {
            continuation.to_string()
        } else {
            format!("{}\n{}", allotted.text, continuation)
        };
        let messages = vec![Message::system(instructions), Message::user(prompt)];

        let settings = CompletionSettings {
            max_tokens: response_limit.max(1) as usize,
            temperature: options.extraction_temperature,
        };
        let completion = self.model.complete(&messages, &settings).await?;

        let tokens = completion.usage.map(|u| u.total_tokens).unwrap_or_else(|| {
            self.estimator.estimate_messages(&messages) + self.estimator.estimate(&completion.text)
        });
        debug!(
            "Extraction used {} history messages and {} tokens",
            allotted.messages.len(),
            tokens
        );

        Ok(Extraction {
            text: completion.text.trim().to_string(),
            tokens,
        })
    }
}
