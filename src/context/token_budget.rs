//! Token budget planning
//!
//! The usable prompt budget is the model's completion ceiling minus the
//! response reservation, the function-call buffer and any extra overhead.
//! Nothing here clamps to zero: a negative remainder is a legitimate result
//! that callers degrade on (empty memory, empty history).

use crate::config::{PromptOptions, Specialization};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Budget for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub total_limit: i64,
    pub reserved_response: i64,
    pub reserved_function_calls: i64,
    pub extra_overhead: i64,
    pub usable: i64,
}

impl Budget {
    /// Tokens left after `consumed` have been spent
    pub fn remaining_after(&self, consumed: i64) -> i64 {
        self.usable - consumed
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Memory weight must be in (0, 1], got {0}")]
    InvalidWeight(f64),
}

impl From<BudgetError> for crate::error::ContextError {
    fn from(e: BudgetError) -> Self {
        crate::error::ContextError::Configuration(e.to_string())
    }
}

/// Token budget planner
#[derive(Debug, Clone, Copy)]
pub struct TokenBudgetPlanner {
    memory_weight: f64,
}

impl TokenBudgetPlanner {
    /// Create a planner with the share of the remainder given to memory text
    pub fn new(memory_weight: f64) -> Result<Self, BudgetError> {
        if !(memory_weight > 0.0 && memory_weight <= 1.0) {
            return Err(BudgetError::InvalidWeight(memory_weight));
        }
        Ok(Self { memory_weight })
    }

    pub fn from_options(options: &PromptOptions) -> Result<Self, BudgetError> {
        Self::new(options.memories_response_context_weight)
    }

    /// Compute the budget by plain subtraction
    pub fn plan(
        &self,
        total_limit: i64,
        response_limit: i64,
        function_call_limit: i64,
        overhead: i64,
    ) -> Budget {
        Budget {
            total_limit,
            reserved_response: response_limit,
            reserved_function_calls: function_call_limit,
            extra_overhead: overhead,
            usable: total_limit - response_limit - function_call_limit - overhead,
        }
    }

    /// Plan from the turn's options, letting the specialization override the response limit
    pub fn plan_for(&self, options: &PromptOptions, specialization: Option<&Specialization>) -> Budget {
        self.plan(
            options.completion_token_limit,
            options.response_limit_for(specialization),
            options.function_call_token_buffer,
            options.extra_overhead_tokens,
        )
    }

    /// Memory share of what remains after `consumed_so_far`
    ///
    /// The history share is not returned; callers recompute it from what the
    /// memory text actually cost.
    pub fn memory_budget(&self, usable: i64, consumed_so_far: i64) -> i64 {
        ((usable - consumed_so_far) as f64 * self.memory_weight).floor() as i64
    }
}
