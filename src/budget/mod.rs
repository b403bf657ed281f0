//! Token budget allocation between prompt, thinking and visible output

pub mod calculator;
pub mod tokenizer;

pub use calculator::{allocate, BudgetConfig, BudgetError, BudgetPlan, TokenBudgetCalculator};
pub use tokenizer::{TiktokenCounter, TokenCounter, TokenizerError, WordBasedCounter};
