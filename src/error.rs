//! Crate-level error type

use crate::budget::{BudgetError, TokenizerError};
use crate::config::ConfigError;
use crate::finish::FinishError;
use crate::runner::RunError;
use crate::stream::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Finish(#[from] FinishError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub type Result<T> = std::result::Result<T, Error>;
