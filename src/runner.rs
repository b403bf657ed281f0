//! Tool runner: budget, stream, finish, register
//!
//! One `run` call is one user-initiated tool invocation. The stages run in a
//! fixed order and each only consumes the previous stage's output:
//! - count prompt tokens and allocate the budget (abort when infeasible)
//! - stream the response, echoing deltas to the output sink
//! - finish the response into a report and a reasoning trace
//! - record both paths in the run registry

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::info;

use crate::budget::{
    BudgetPlan, TiktokenCounter, TokenBudgetCalculator, TokenCounter, TokenizerError,
    WordBasedCounter,
};
use crate::config::{Config, TokenizerKind};
use crate::finish::{ArtifactStore, ArtifactTarget, FinishError, FsArtifactStore, ResponseFinisher, RunArtifact};
use crate::metrics::METRICS;
use crate::registry::RunRegistry;
use crate::sink::OutputSink;
use crate::stream::{AnthropicClient, ModelClient, StreamError, StreamingSession};

/// One tool invocation
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub tool_id: String,
    /// Fully assembled prompt (instructions plus manuscript)
    pub prompt: String,
    /// Directory the artifacts are written to
    pub destination: PathBuf,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub plan: BudgetPlan,
    pub artifact: RunArtifact,
}

/// Run errors
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(
        "Prompt too large for the required reasoning depth: {} tokens available, {} required",
        .plan.available_tokens,
        .plan.required_tokens
    )]
    InfeasibleBudget { plan: BudgetPlan },

    #[error("Token count failed: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("Model stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("Saving results failed: {0}")]
    Persist(#[from] FinishError),
}

impl RunError {
    pub fn is_infeasible(&self) -> bool {
        matches!(self, RunError::InfeasibleBudget { .. })
    }

    /// Message shown to the user; the remedy differs per failure kind
    pub fn user_message(&self) -> String {
        match self {
            RunError::InfeasibleBudget { plan } => format!(
                "The prompt is too large for the required reasoning depth. \
                 It uses {} of {} context tokens; shorten the input by at least {} tokens and run again.",
                plan.prompt_tokens,
                plan.context_window,
                plan.shortfall()
            ),
            RunError::Tokenizer(e) => format!(
                "Could not count the prompt tokens ({}). Please try again later.",
                e
            ),
            RunError::Stream(e) => format!(
                "The model request failed ({}). Please try again later.",
                e
            ),
            RunError::Persist(e) => format!(
                "The response could not be saved ({}). Check the output folder and try again.",
                e
            ),
        }
    }

    fn status_label(&self) -> &'static str {
        match self {
            RunError::InfeasibleBudget { .. } => "infeasible",
            RunError::Tokenizer(_) => "tokenizer_error",
            RunError::Stream(_) => "stream_error",
            RunError::Persist(_) => "persist_error",
        }
    }
}

/// Wires the budget calculator, streaming session, finisher and registry
pub struct ToolRunner {
    counter: Arc<dyn TokenCounter>,
    calculator: TokenBudgetCalculator,
    session: StreamingSession,
    finisher: ResponseFinisher,
    registry: Arc<RunRegistry>,
}

impl ToolRunner {
    pub fn new(
        calculator: TokenBudgetCalculator,
        counter: Arc<dyn TokenCounter>,
        client: Arc<dyn ModelClient>,
        store: Arc<dyn ArtifactStore>,
        registry: Arc<RunRegistry>,
    ) -> Self {
        Self {
            session: StreamingSession::new(client),
            finisher: ResponseFinisher::new(counter.clone(), store),
            counter,
            calculator,
            registry,
        }
    }

    /// Build a runner against the configured Anthropic endpoint.
    ///
    /// `[model].tokenizer` picks the counter; the same one measures prompts
    /// and responses.
    pub fn from_config(config: &Config, registry: Arc<RunRegistry>) -> crate::error::Result<Self> {
        let calculator = TokenBudgetCalculator::new(config.budget.clone())?;
        let client = Arc::new(AnthropicClient::new(config.model.clone())?);

        let counter: Arc<dyn TokenCounter> = match config.model.tokenizer {
            TokenizerKind::Remote => client.clone(),
            TokenizerKind::Tiktoken => Arc::new(TiktokenCounter::new()?),
            TokenizerKind::Words => Arc::new(WordBasedCounter::default()),
        };

        let runner = Self::new(
            calculator,
            counter,
            client,
            Arc::new(FsArtifactStore),
            registry,
        )
        .with_event_timeout(config.model.event_timeout());

        Ok(runner)
    }

    pub fn with_event_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.session = self.session.with_event_timeout(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Run one tool invocation, reporting progress to `sink`
    pub async fn run(
        &self,
        request: &ToolRequest,
        sink: &dyn OutputSink,
    ) -> Result<RunOutcome, RunError> {
        let started_at = Local::now();
        let result = self.execute(request, sink, started_at).await;

        match &result {
            Ok(_) => METRICS.record_run(&request.tool_id, "success"),
            Err(e) => {
                METRICS.record_run(&request.tool_id, e.status_label());
                sink.emit(&format!("\n{}\n", e.user_message()));
            }
        }

        result
    }

    async fn execute(
        &self,
        request: &ToolRequest,
        sink: &dyn OutputSink,
        started_at: DateTime<Local>,
    ) -> Result<RunOutcome, RunError> {
        let ticket = self.registry.clear(&request.tool_id);

        let prompt_tokens = self.counter.count(&request.prompt).await?;
        sink.emit(&format!("Prompt tokens: {}\n", prompt_tokens));

        let plan = self.calculator.allocate(prompt_tokens);
        METRICS.record_plan(
            plan.thinking_budget,
            plan.visible_output_tokens,
            plan.capped,
            plan.infeasible,
        );

        if plan.capped {
            sink.emit(&format!(
                "Warning: thinking budget reduced from {} to the maximum of {} tokens\n",
                self.calculator.config().configured_thinking_budget,
                plan.thinking_budget
            ));
        }

        if plan.infeasible {
            return Err(RunError::InfeasibleBudget { plan });
        }

        sink.emit(&format!(
            "Available tokens: {}  Thinking budget: {}  Max output tokens: {}\n",
            plan.available_tokens, plan.thinking_budget, plan.max_tokens
        ));

        let mut thinking_open = false;
        let mut answer_open = false;
        let accumulator = self
            .session
            .run(
                &request.prompt,
                &plan,
                |delta| {
                    if !thinking_open {
                        sink.emit("\n*** Thinking...\n");
                        thinking_open = true;
                    }
                    sink.emit(delta);
                },
                |delta| {
                    if !answer_open {
                        sink.emit("\n*** Response...\n");
                        answer_open = true;
                    }
                    sink.emit(delta);
                },
            )
            .await?;

        let target = ArtifactTarget::for_run(&ticket, &request.destination);
        let artifact = self
            .finisher
            .finish(&target, accumulator, prompt_tokens, started_at)
            .await?;

        for path in artifact.paths() {
            self.registry.record_run(&ticket, path);
        }
        METRICS.record_artifacts(artifact.paths().len());

        let secs = artifact.elapsed.as_secs();
        sink.emit(&format!(
            "\n\nElapsed time: {}m {}s\nReport has {} words ({} tokens)\nSaved to: {}\n",
            secs / 60,
            secs % 60,
            artifact.word_count,
            artifact.response_tokens,
            artifact.report_path.display()
        ));

        info!(
            "Run of {} complete: {}",
            request.tool_id,
            artifact.report_path.display()
        );

        Ok(RunOutcome { plan, artifact })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;

    #[test]
    fn test_infeasible_message_is_distinct() {
        let plan = crate::budget::allocate(170_000, &BudgetConfig::default());
        let infeasible = RunError::InfeasibleBudget { plan };
        let transport = RunError::Stream(StreamError::Timeout("idle".to_string()));

        assert!(infeasible.is_infeasible());
        assert!(infeasible.user_message().contains("too large for the required reasoning depth"));
        assert!(infeasible.user_message().contains("6000 tokens"));
        assert!(!transport.is_infeasible());
        assert!(transport.user_message().contains("try again later"));
        assert_ne!(infeasible.user_message(), transport.user_message());
    }

    #[test]
    fn test_from_config_builds_runner() {
        let runner = ToolRunner::from_config(&Config::default(), Arc::new(RunRegistry::new()));
        assert!(runner.is_ok());
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_tokenizer() {
        let mut config = Config::default();
        let prompt = "Count these five words";

        config.model.tokenizer = TokenizerKind::Words;
        let runner = ToolRunner::from_config(&config, Arc::new(RunRegistry::new())).unwrap();
        assert_eq!(runner.counter.count(prompt).await.unwrap(), 6); // 4 * 1.3 = 5.2 -> 6

        config.model.tokenizer = TokenizerKind::Tiktoken;
        let runner = ToolRunner::from_config(&config, Arc::new(RunRegistry::new())).unwrap();
        let expected = TiktokenCounter::new().unwrap().count_blocking(prompt);
        assert_eq!(runner.counter.count(prompt).await.unwrap(), expected);
    }

    #[test]
    fn test_new_accepts_local_counter() {
        let counter: Arc<dyn TokenCounter> = Arc::new(WordBasedCounter::default());
        let client = Arc::new(AnthropicClient::new(Default::default()).unwrap());
        let runner = ToolRunner::new(
            TokenBudgetCalculator::new(BudgetConfig::default()).unwrap(),
            counter,
            client,
            Arc::new(FsArtifactStore),
            Arc::new(RunRegistry::new()),
        );
        assert!(runner.registry().list("any").is_empty());
    }
}
