//! Token budget allocation for thinking-enabled requests
//!
//! The context window is shared by the prompt, the model's private thinking
//! and the visible answer. Allocation order:
//! - Prompt: whatever the tokenizer counted, taken off the top
//! - Thinking: the configured budget, capped at the hard maximum, never shrunk
//! - Visible output: the desired size, shrunk to fit what is left
//!
//! A request that cannot hold full thinking plus the minimum visible output is
//! infeasible and must be aborted by the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Token budget configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total tokens the model holds for one exchange (input + output)
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Preferred size of the visible answer
    #[serde(default = "default_desired_output")]
    pub desired_output_tokens: usize,

    /// Requested reasoning allowance
    #[serde(default = "default_thinking_budget")]
    pub configured_thinking_budget: usize,

    /// Hard cap on reasoning, independent of what was requested
    #[serde(default = "default_max_thinking")]
    pub max_thinking_budget: usize,

    /// Smallest visible answer considered useful
    #[serde(default = "default_minimum_visible")]
    pub minimum_visible_output_tokens: usize,
}

fn default_context_window() -> usize { 200_000 }
fn default_desired_output() -> usize { 12_000 }
fn default_thinking_budget() -> usize { 32_000 }
fn default_max_thinking() -> usize { 32_000 }
fn default_minimum_visible() -> usize { 4_000 }

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            desired_output_tokens: default_desired_output(),
            configured_thinking_budget: default_thinking_budget(),
            max_thinking_budget: default_max_thinking(),
            minimum_visible_output_tokens: default_minimum_visible(),
        }
    }
}

impl BudgetConfig {
    /// Validate that the budget configuration is consistent
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_thinking_budget > self.context_window {
            return Err(BudgetError::ConfigurationInvalid {
                allocated: self.max_thinking_budget,
                max: self.context_window,
            });
        }

        Ok(())
    }

    /// Thinking tokens a request gets under this configuration
    pub fn effective_thinking_budget(&self) -> usize {
        self.configured_thinking_budget.min(self.max_thinking_budget)
    }
}

/// Concrete split of the output ceiling for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPlan {
    pub prompt_tokens: usize,
    pub context_window: usize,
    pub available_tokens: usize,
    pub thinking_budget: usize,
    pub visible_output_tokens: usize,
    /// Output ceiling sent with the request (thinking + visible)
    pub max_tokens: usize,
    /// Configured thinking budget exceeded the hard cap and was reduced
    pub capped: bool,
    /// No valid plan exists; only diagnostics are meaningful
    pub infeasible: bool,
    /// Thinking budget plus minimum visible output
    pub required_tokens: usize,
}

impl BudgetPlan {
    pub fn is_feasible(&self) -> bool {
        !self.infeasible
    }

    /// Tokens the prompt would have to shed for the plan to become feasible
    pub fn shortfall(&self) -> usize {
        self.required_tokens.saturating_sub(self.available_tokens)
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Configuration invalid: {allocated} thinking tokens allowed, {max} tokens context window")]
    ConfigurationInvalid { allocated: usize, max: usize },
}

/// Allocate the output ceiling for a prompt of `prompt_tokens` tokens.
///
/// Infeasibility is reported through [`BudgetPlan::infeasible`], never as an
/// error.
pub fn allocate(prompt_tokens: usize, config: &BudgetConfig) -> BudgetPlan {
    let available_tokens = config.context_window.saturating_sub(prompt_tokens);
    let thinking_budget = config.effective_thinking_budget();
    let capped = config.configured_thinking_budget > config.max_thinking_budget;
    let required_tokens = thinking_budget.saturating_add(config.minimum_visible_output_tokens);

    if available_tokens < required_tokens {
        return BudgetPlan {
            prompt_tokens,
            context_window: config.context_window,
            available_tokens,
            thinking_budget,
            visible_output_tokens: 0,
            max_tokens: 0,
            capped,
            infeasible: true,
            required_tokens,
        };
    }

    let remaining = available_tokens - thinking_budget;
    // remaining >= minimum here, so the floor cannot push past the ceiling
    let visible_output_tokens = config
        .desired_output_tokens
        .min(remaining)
        .max(config.minimum_visible_output_tokens);

    BudgetPlan {
        prompt_tokens,
        context_window: config.context_window,
        available_tokens,
        thinking_budget,
        visible_output_tokens,
        max_tokens: thinking_budget + visible_output_tokens,
        capped,
        infeasible: false,
        required_tokens,
    }
}

/// Budget calculator bound to a validated configuration
#[derive(Debug, Clone)]
pub struct TokenBudgetCalculator {
    config: BudgetConfig,
}

impl TokenBudgetCalculator {
    /// Create a new calculator
    pub fn new(config: BudgetConfig) -> Result<Self, BudgetError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Allocate tokens for a prompt, logging caps and infeasibility
    pub fn allocate(&self, prompt_tokens: usize) -> BudgetPlan {
        let plan = allocate(prompt_tokens, &self.config);

        if plan.capped {
            warn!(
                "Thinking budget capped: {} requested, {} granted",
                self.config.configured_thinking_budget, plan.thinking_budget
            );
        }

        if plan.infeasible {
            warn!(
                "Budget infeasible: {} tokens available, {} required",
                plan.available_tokens, plan.required_tokens
            );
        } else {
            debug!(
                "Budget plan: prompt={} thinking={} visible={} max_tokens={}",
                plan.prompt_tokens, plan.thinking_budget, plan.visible_output_tokens, plan.max_tokens
            );
        }

        plan
    }

    /// Get the configuration
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }
}
