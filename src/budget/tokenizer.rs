//! Token counting for prompts and finished responses

use async_trait::async_trait;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Tokenizer errors
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Count request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Counting task failed: {0}")]
    TaskFailed(String),
}

/// Token counter used identically for prompts and responses
#[async_trait]
pub trait TokenCounter: Send + Sync {
    /// Count the tokens in the given text
    async fn count(&self, text: &str) -> Result<usize, TokenizerError>;
}

/// Local cl100k_base counter.
///
/// Approximates the remote tokenizer without a network round trip. Encoding a
/// full manuscript is CPU-bound, so async counts run on the blocking pool.
#[derive(Clone)]
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    pub fn new() -> Result<Self, TokenizerError> {
        let bpe = cl100k_base().map_err(|e| TokenizerError::InitializationError(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Count on the calling thread. Special-token markup in the text is
    /// counted as ordinary prose.
    pub fn count_blocking(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

#[async_trait]
impl TokenCounter for TiktokenCounter {
    async fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        if text.is_empty() {
            return Ok(0);
        }

        let counter = self.clone();
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || counter.count_blocking(&text))
            .await
            .map_err(|e| TokenizerError::TaskFailed(e.to_string()))
    }
}

/// Word-based counter (fallback, ~1.3 tokens per word)
pub struct WordBasedCounter {
    tokens_per_word: f64,
}

impl WordBasedCounter {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedCounter {
    fn default() -> Self {
        Self::new(1.3)
    }
}

#[async_trait]
impl TokenCounter for WordBasedCounter {
    async fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        let word_count = text.split_whitespace().count();
        Ok((word_count as f64 * self.tokens_per_word).ceil() as usize)
    }
}
