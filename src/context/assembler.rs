//! Turn context assembly with token budget enforcement
//!
//! Builds the prompt for one turn in budget order:
//! - fixed system instructions
//! - audience and user intent, extracted concurrently
//! - memory text sized to a weighted share of what remains
//! - as much recent history as still fits

use super::extractor::{try_or_default, SemanticExtractor};
use super::history::ChatHistoryAllotter;
use super::models::{ConversationTurnContext, Message, Role};
use super::prompt::render_system_instructions;
use super::token_budget::TokenBudgetPlanner;
use super::token_estimator::TokenEstimator;
use super::usage::{TokenAccountant, AUDIENCE_EXTRACTION, SYSTEM_PROMPT, USER_INTENT_EXTRACTION};
use crate::config::PromptOptions;
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use crate::services::{ChatCompletion, ChatStore, MemoryResult, MemoryRetriever};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const AUDIENCE_LABEL: &str = "List of participants: ";
pub const USER_INTENT_LABEL: &str = "User intent: ";

/// Input for one turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub chat_id: String,
    /// The new user message; expected to already be in the chat log
    pub user_message: String,
    /// Options snapshot for this turn
    pub options: PromptOptions,
}

/// Context assembler
pub struct ContextAssembler {
    estimator: Arc<dyn TokenEstimator>,
    store: Arc<dyn ChatStore>,
    memory: Arc<dyn MemoryRetriever>,
    extractor: SemanticExtractor,
    allotter: ChatHistoryAllotter,
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ContextError::Cancelled);
    }
    Ok(())
}

impl ContextAssembler {
    pub fn new(
        estimator: Arc<dyn TokenEstimator>,
        model: Arc<dyn ChatCompletion>,
        store: Arc<dyn ChatStore>,
        memory: Arc<dyn MemoryRetriever>,
    ) -> Self {
        Self {
            extractor: SemanticExtractor::new(model, estimator.clone()),
            allotter: ChatHistoryAllotter::new(estimator.clone()),
            estimator,
            store,
            memory,
        }
    }

    /// Assemble the prompt for one turn
    pub async fn assemble(
        &self,
        request: TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<ConversationTurnContext> {
        let TurnRequest {
            chat_id,
            user_message,
            options,
        } = request;

        let session = self
            .store
            .find_session(&chat_id)
            .await?
            .ok_or_else(|| ContextError::NotFound(format!("chat session {}", chat_id)))?;

        let specialization = match session.specialization_id.as_deref() {
            Some(id) => {
                let found = self.store.find_specialization(id).await?;
                if found.is_none() {
                    warn!("Specialization {} not found, using global defaults", id);
                }
                found
            }
            None => None,
        };
        let active = specialization.as_ref();

        let planner = TokenBudgetPlanner::from_options(&options)?;
        let budget = planner.plan_for(&options, active);
        let window = options.past_messages_for(active);
        debug!(
            "Budget for {}: total={}, response={}, functions={}, usable={}",
            chat_id, budget.total_limit, budget.reserved_response, budget.reserved_function_calls, budget.usable
        );

        let system_message = Message::system(render_system_instructions(&options, active, Utc::now()));
        let history = self.store.find_messages(&chat_id, 0, window).await?;

        ensure_not_cancelled(cancel)?;

        let audience_task = try_or_default(
            AUDIENCE_EXTRACTION,
            async {
                self.extractor
                    .extract_audience(&history, &options, active)
                    .await
                    .map(Some)
            },
            None,
        );
        let intent_task = async {
            if !options.intent_extraction_enabled {
                return None;
            }
            try_or_default(
                USER_INTENT_EXTRACTION,
                async {
                    self.extractor
                        .extract_user_intent(&history, &options, active)
                        .await
                        .map(Some)
                },
                None,
            )
            .await
        };
        let (audience, intent) = tokio::join!(audience_task, intent_task);

        let mut accountant = TokenAccountant::new(self.estimator.clone());
        if let Some(ref extraction) = audience {
            accountant.record(AUDIENCE_EXTRACTION, extraction.tokens);
        }
        if let Some(ref extraction) = intent {
            accountant.record(USER_INTENT_EXTRACTION, extraction.tokens);
        }

        let audience = audience.map(|e| e.text).unwrap_or_default();
        let user_intent = intent.map(|e| e.text).filter(|t| !t.is_empty());

        let audience_message =
            (!audience.is_empty()).then(|| Message::system(format!("{}{}", AUDIENCE_LABEL, audience)));
        let intent_message = user_intent
            .as_ref()
            .map(|intent| Message::system(format!("{}{}", USER_INTENT_LABEL, intent)));

        let tokens_used: i64 = std::iter::once(&system_message)
            .chain(audience_message.as_ref())
            .chain(intent_message.as_ref())
            .map(|m| self.estimator.estimate_message(m.role, &m.text) as i64)
            .sum();

        // Memory gets a weighted share of what remains after the new message
        let user_tokens = self.estimator.estimate_message(Role::User, &user_message) as i64;
        let memory_budget = planner.memory_budget(budget.usable, tokens_used + user_tokens);

        ensure_not_cancelled(cancel)?;

        let memory = if memory_budget > 0 {
            let query = user_intent.as_deref().unwrap_or(&user_message);
            self.memory.query(query, &chat_id, memory_budget as usize).await?
        } else {
            warn!(
                "No token budget left for memories in {} ({} tokens), skipping retrieval",
                chat_id, memory_budget
            );
            METRICS.record_budget_exhausted("memory");
            MemoryResult::default()
        };

        let memory_message = (!memory.text.is_empty()).then(|| Message::system(memory.text.clone()));
        let memory_tokens = memory_message
            .as_ref()
            .map(|m| self.estimator.estimate_message(m.role, &m.text) as i64)
            .unwrap_or(0);

        let history_budget = budget.remaining_after(tokens_used + memory_tokens);
        let allotted = self.allotter.allot(&history, history_budget, window);
        if allotted.is_empty() && !history.is_empty() {
            warn!(
                "No chat history fits in {} ({} tokens left)",
                chat_id, history_budget
            );
            METRICS.record_budget_exhausted("history");
        }

        let mut messages = vec![system_message.clone()];
        messages.extend(audience_message);
        messages.extend(intent_message);
        messages.extend(memory_message);
        messages.extend(allotted.messages);

        let prompt_tokens = self.estimator.estimate_messages(&messages);
        accountant.record(SYSTEM_PROMPT, prompt_tokens);
        METRICS.record_turn(prompt_tokens);

        info!(
            "Assembled turn for {}: {} messages, {} prompt tokens (usable {})",
            chat_id,
            messages.len(),
            prompt_tokens,
            budget.usable
        );

        Ok(ConversationTurnContext {
            chat_id,
            specialization_id: session.specialization_id,
            specialization,
            system_instructions: system_message.text,
            audience,
            user_intent,
            memory_text: memory.text,
            memory_citations: memory.citations.into_values().collect(),
            allotted_history: allotted.text,
            messages,
            budget,
            token_usage: accountant.snapshot(),
        })
    }
}
