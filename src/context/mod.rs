//! Context management with token budget enforcement
//!
//! Assembles the prompt for one conversation turn so that system
//! instructions, extracted audience and intent, memory text and chat history
//! together never exceed the model's usable token budget.

pub mod assembler;
pub mod extractor;
pub mod history;
pub mod models;
pub mod prompt;
pub mod token_budget;
pub mod token_estimator;
pub mod usage;

pub use assembler::{ContextAssembler, TurnRequest, AUDIENCE_LABEL, USER_INTENT_LABEL};
pub use extractor::{try_or_default, Extraction, SemanticExtractor};
pub use history::{AllottedHistory, ChatHistoryAllotter};
pub use models::{AuthorRole, ChatEntry, ChatEntryType, ConversationTurnContext, Message, Role};
pub use prompt::{render_system_instructions, render_template, turn_variables};
pub use token_budget::{Budget, BudgetError, TokenBudgetPlanner};
pub use token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};
pub use usage::{TokenAccountant, TokenUsageMap};
