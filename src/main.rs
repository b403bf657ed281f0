use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use manuscript_engine::config::Config;
use manuscript_engine::metrics::METRICS;
use manuscript_engine::sink::{OutputSink, StdoutSink, TracingSink};
use manuscript_engine::{logging, RunRegistry, ToolRequest, ToolRunner};

#[derive(Parser)]
#[command(
    name = "manuscript-engine",
    version,
    about = "Run a manuscript analysis tool against a thinking-enabled model"
)]
struct Cli {
    /// Tool identifier used to name the artifacts (e.g. "copy_editing")
    tool: String,
    /// File holding the tool's instructions
    #[arg(long)]
    prompt: PathBuf,
    /// Manuscript to analyze
    #[arg(long)]
    manuscript: PathBuf,
    /// Directory for the report and reasoning trace (defaults to [output].directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write Prometheus metrics for this invocation to FILE when done
    #[arg(long, value_name = "FILE")]
    metrics_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init(&config.logging);

    let instructions = tokio::fs::read_to_string(&cli.prompt)
        .await
        .with_context(|| format!("reading {}", cli.prompt.display()))?;
    let manuscript = tokio::fs::read_to_string(&cli.manuscript)
        .await
        .with_context(|| format!("reading {}", cli.manuscript.display()))?;

    let request = ToolRequest {
        tool_id: cli.tool,
        prompt: format!("=== MANUSCRIPT ===\n{}\n=== END MANUSCRIPT ===\n\n{}", manuscript, instructions),
        destination: cli.output_dir.unwrap_or_else(|| config.output.directory.clone()),
    };

    // JSON logs go to a collector, so progress joins them instead of stdout
    let sink: Box<dyn OutputSink> = if config.logging.json {
        Box::new(TracingSink)
    } else {
        Box::new(StdoutSink)
    };

    let runner = ToolRunner::from_config(&config, Arc::new(RunRegistry::new()))?;
    let result = runner.run(&request, sink.as_ref()).await;

    if let Some(path) = &cli.metrics_out {
        tokio::fs::write(path, METRICS.export_prometheus())
            .await
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    let outcome = result?;

    info!(
        "Artifacts: {}",
        runner
            .registry()
            .list(&request.tool_id)
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("Thinking budget used for plan: {}", outcome.plan.thinking_budget);

    Ok(())
}
