//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, Histogram, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, histogram_opts,
};
use std::sync::Arc;
use std::time::Duration;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Run metrics
    pub runs: CounterVec,

    // Budget metrics
    pub budget_infeasible: Counter,
    pub budget_capped: Counter,
    pub thinking_tokens_granted: Histogram,
    pub visible_tokens_granted: Histogram,

    // Stream metrics
    pub stream_requests: CounterVec,
    pub stream_duration: Histogram,

    // Artifact metrics
    pub artifacts_written: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let runs = register_counter_vec_with_registry!(
            Opts::new("tool_runs_total", "Total tool runs by outcome"),
            &["tool", "status"],
            registry
        )?;

        let budget_infeasible = register_counter_with_registry!(
            Opts::new("budget_infeasible_total", "Total runs aborted for an infeasible budget"),
            registry
        )?;

        let budget_capped = register_counter_with_registry!(
            Opts::new("budget_capped_total", "Total plans whose thinking budget was capped"),
            registry
        )?;

        let token_buckets = vec![1_000.0, 4_000.0, 8_000.0, 16_000.0, 32_000.0, 64_000.0, 128_000.0];

        let thinking_tokens_granted = register_histogram_with_registry!(
            histogram_opts!(
                "thinking_tokens_granted",
                "Thinking tokens granted per plan",
                token_buckets.clone()
            ),
            registry
        )?;

        let visible_tokens_granted = register_histogram_with_registry!(
            histogram_opts!(
                "visible_tokens_granted",
                "Visible output tokens granted per plan",
                token_buckets
            ),
            registry
        )?;

        let stream_requests = register_counter_vec_with_registry!(
            Opts::new("stream_requests_total", "Total streaming requests"),
            &["status"],
            registry
        )?;

        let stream_duration = register_histogram_with_registry!(
            histogram_opts!(
                "stream_duration_seconds",
                "Streaming request duration in seconds",
                vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]
            ),
            registry
        )?;

        let artifacts_written = register_counter_with_registry!(
            Opts::new("artifacts_written_total", "Total report and reasoning files written"),
            registry
        )?;

        Ok(Self {
            registry,
            runs,
            budget_infeasible,
            budget_capped,
            thinking_tokens_granted,
            visible_tokens_granted,
            stream_requests,
            stream_duration,
            artifacts_written,
        })
    }

    /// Record a tool run outcome
    pub fn record_run(&self, tool_id: &str, status: &str) {
        self.runs.with_label_values(&[tool_id, status]).inc();
    }

    /// Record a budget plan
    pub fn record_plan(&self, thinking: usize, visible: usize, capped: bool, infeasible: bool) {
        if capped {
            self.budget_capped.inc();
        }
        if infeasible {
            self.budget_infeasible.inc();
            return;
        }
        self.thinking_tokens_granted.observe(thinking as f64);
        self.visible_tokens_granted.observe(visible as f64);
    }

    /// Record a finished or failed stream
    pub fn record_stream(&self, elapsed: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        self.stream_requests.with_label_values(&[status]).inc();
        self.stream_duration.observe(elapsed.as_secs_f64());
    }

    /// Record written artifact files
    pub fn record_artifacts(&self, count: usize) {
        self.artifacts_written.inc_by(count as f64);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
