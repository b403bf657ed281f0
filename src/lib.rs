//! Manuscript analysis engine
//!
//! Runs long-form text analysis against a model whose context window is
//! shared by the prompt, private thinking and the visible answer:
//! - [`budget`]: splits the window, rejecting prompts that leave too little room
//! - [`stream`]: drives one streamed request and separates the two channels
//! - [`finish`]: cleans the answer and writes the report and reasoning trace
//! - [`registry`]: remembers each tool's most recent artifacts
//! - [`runner`]: wires the stages together for one tool invocation

pub mod budget;
pub mod config;
pub mod error;
pub mod finish;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod runner;
pub mod sink;
pub mod stream;

pub use budget::{allocate, BudgetConfig, BudgetPlan, TokenBudgetCalculator, TokenCounter};
pub use error::{Error, Result};
pub use finish::{ResponseFinisher, RunArtifact};
pub use registry::RunRegistry;
pub use runner::{RunError, RunOutcome, ToolRequest, ToolRunner};
pub use sink::OutputSink;
pub use stream::{StreamAccumulator, StreamingSession};
