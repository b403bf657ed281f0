//! Streaming session: one request, two channels
//!
//! A session opens a single request sized by a [`BudgetPlan`] and splits the
//! incoming events into the thinking channel and the visible channel. Events
//! are handled strictly in arrival order; the only suspension point is the
//! wait for the next event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::client::{ModelClient, ModelRequest, StreamError};
use super::events::{ModelEvent, UsageMetadata};
use crate::budget::BudgetPlan;
use crate::metrics::METRICS;

/// Fragments collected during one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAccumulator {
    thinking: Vec<String>,
    visible: Vec<String>,
    usage: Option<UsageMetadata>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_thinking(&mut self, fragment: impl Into<String>) {
        self.thinking.push(fragment.into());
    }

    pub fn push_visible(&mut self, fragment: impl Into<String>) {
        self.visible.push(fragment.into());
    }

    /// Capture usage once; later reports are ignored and `false` is returned
    pub fn record_usage(&mut self, usage: UsageMetadata) -> bool {
        if self.usage.is_some() {
            return false;
        }
        self.usage = Some(usage);
        true
    }

    pub fn thinking_fragments(&self) -> &[String] {
        &self.thinking
    }

    pub fn visible_fragments(&self) -> &[String] {
        &self.visible
    }

    pub fn usage(&self) -> Option<&UsageMetadata> {
        self.usage.as_ref()
    }

    pub fn thinking_text(&self) -> String {
        self.thinking.concat()
    }

    pub fn visible_text(&self) -> String {
        self.visible.concat()
    }
}

/// Drives one request/response exchange against the remote model
pub struct StreamingSession {
    client: Arc<dyn ModelClient>,
    event_timeout: Option<Duration>,
}

impl StreamingSession {
    /// Create a new session without an idle timeout
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            event_timeout: None,
        }
    }

    /// Fail the session when no event arrives within `timeout`
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = Some(timeout);
        self
    }

    /// Run the request described by `plan`.
    ///
    /// Deltas are handed to `on_thinking` / `on_text` synchronously as they
    /// arrive. A transport failure ends the session with a single error;
    /// fragments already delivered through the callbacks stay with the caller.
    /// Dropping the returned future closes the connection.
    pub async fn run<T, V>(
        &self,
        prompt: &str,
        plan: &BudgetPlan,
        mut on_thinking: T,
        mut on_text: V,
    ) -> Result<StreamAccumulator, StreamError>
    where
        T: FnMut(&str),
        V: FnMut(&str),
    {
        if plan.infeasible {
            return Err(StreamError::InfeasiblePlan);
        }

        let start = Instant::now();
        let request = ModelRequest {
            prompt: prompt.to_string(),
            max_output_tokens: plan.max_tokens,
            thinking_budget_tokens: plan.thinking_budget,
        };

        let result = async {
            let mut events = self.client.stream(request).await?;
            let mut accumulator = StreamAccumulator::new();
            let mut stopped = false;

            loop {
                let next = match self.event_timeout {
                    Some(limit) => tokio::time::timeout(limit, events.next())
                        .await
                        .map_err(|_| {
                            StreamError::Timeout(format!("no stream event within {:?}", limit))
                        })?,
                    None => events.next().await,
                };

                let Some(event) = next else { break };

                match event? {
                    ModelEvent::ThinkingDelta(delta) => {
                        on_thinking(&delta);
                        accumulator.push_thinking(delta);
                    }
                    ModelEvent::TextDelta(delta) => {
                        on_text(&delta);
                        accumulator.push_visible(delta);
                    }
                    ModelEvent::Usage(usage) => {
                        if !accumulator.record_usage(usage) {
                            debug!("Ignoring repeated usage report");
                        }
                    }
                    ModelEvent::MessageStop => {
                        stopped = true;
                        break;
                    }
                }
            }

            // A body that closes without message_stop is a cut-off answer
            if !stopped {
                return Err(StreamError::RequestFailed(
                    "stream ended before message_stop".to_string(),
                ));
            }

            Ok::<_, StreamError>(accumulator)
        }
        .await;

        METRICS.record_stream(start.elapsed(), result.is_ok());

        match &result {
            Ok(accumulator) => info!(
                "Stream complete in {:.1}s: {} thinking fragments, {} visible fragments",
                start.elapsed().as_secs_f64(),
                accumulator.thinking_fragments().len(),
                accumulator.visible_fragments().len()
            ),
            Err(e) => warn!("Stream failed after {:.1}s: {}", start.elapsed().as_secs_f64(), e),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{allocate, BudgetConfig};
    use crate::stream::client::EventStream;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Replays a fixed event list and remembers the request it was given
    struct ScriptedClient {
        events: Mutex<Option<Vec<Result<ModelEvent, StreamError>>>>,
        seen: Mutex<Option<ModelRequest>>,
    }

    impl ScriptedClient {
        fn new(events: Vec<Result<ModelEvent, StreamError>>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Some(events)),
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream(&self, request: ModelRequest) -> Result<EventStream, StreamError> {
            *self.seen.lock().unwrap() = Some(request);
            let events = self.events.lock().unwrap().take().unwrap_or_default();
            Ok(stream::iter(events).boxed())
        }
    }

    fn feasible_plan() -> BudgetPlan {
        allocate(106_448, &BudgetConfig::default())
    }

    fn usage(read: usize) -> UsageMetadata {
        UsageMetadata {
            cache_read_input_tokens: read,
            ..UsageMetadata::default()
        }
    }

    #[tokio::test]
    async fn test_demultiplexes_channels_in_order() {
        let mut script: Vec<Result<ModelEvent, StreamError>> = (1..=3)
            .map(|i| Ok(ModelEvent::ThinkingDelta(format!("t{}", i))))
            .collect();
        script.extend((1..=5).map(|i| Ok(ModelEvent::TextDelta(format!("v{}", i)))));
        script.push(Ok(ModelEvent::Usage(usage(10))));
        script.push(Ok(ModelEvent::MessageStop));
        let client = ScriptedClient::new(script);

        let mut thinking_seen = Vec::new();
        let mut text_seen = Vec::new();
        let accumulator = StreamingSession::new(client.clone())
            .run(
                "prompt",
                &feasible_plan(),
                |d| thinking_seen.push(d.to_string()),
                |d| text_seen.push(d.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(accumulator.thinking_fragments(), ["t1", "t2", "t3"]);
        assert_eq!(accumulator.visible_fragments(), ["v1", "v2", "v3", "v4", "v5"]);
        assert_eq!(accumulator.usage(), Some(&usage(10)));
        assert_eq!(thinking_seen, ["t1", "t2", "t3"]);
        assert_eq!(text_seen.len(), 5);

        let seen = client.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.max_output_tokens, 44_000);
        assert_eq!(seen.thinking_budget_tokens, 32_000);
    }

    #[tokio::test]
    async fn test_usage_captured_once() {
        let client = ScriptedClient::new(vec![
            Ok(ModelEvent::Usage(usage(1))),
            Ok(ModelEvent::Usage(usage(2))),
            Ok(ModelEvent::MessageStop),
        ]);
        let accumulator = StreamingSession::new(client)
            .run("prompt", &feasible_plan(), |_| {}, |_| {})
            .await
            .unwrap();
        assert_eq!(accumulator.usage(), Some(&usage(1)));
    }

    #[tokio::test]
    async fn test_infeasible_plan_fails_fast() {
        let client = ScriptedClient::new(vec![]);
        let plan = allocate(196_001, &BudgetConfig::default());
        let result = StreamingSession::new(client.clone())
            .run("prompt", &plan, |_| {}, |_| {})
            .await;
        assert!(matches!(result, Err(StreamError::InfeasiblePlan)));
        assert!(client.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_terminates_after_partial_delivery() {
        let client = ScriptedClient::new(vec![
            Ok(ModelEvent::TextDelta("partial".to_string())),
            Err(StreamError::RequestFailed("connection reset".to_string())),
            Ok(ModelEvent::TextDelta("never".to_string())),
        ]);
        let mut delivered = Vec::new();
        let result = StreamingSession::new(client)
            .run("prompt", &feasible_plan(), |_| {}, |d| delivered.push(d.to_string()))
            .await;
        assert!(matches!(result, Err(StreamError::RequestFailed(_))));
        assert_eq!(delivered, ["partial"]);
    }

    #[tokio::test]
    async fn test_message_stop_ends_session() {
        let client = ScriptedClient::new(vec![
            Ok(ModelEvent::TextDelta("done".to_string())),
            Ok(ModelEvent::MessageStop),
            Ok(ModelEvent::TextDelta("trailing".to_string())),
        ]);
        let accumulator = StreamingSession::new(client)
            .run("prompt", &feasible_plan(), |_| {}, |_| {})
            .await
            .unwrap();
        assert_eq!(accumulator.visible_text(), "done");
    }

    #[tokio::test]
    async fn test_stream_closed_without_message_stop_fails() {
        let client = ScriptedClient::new(vec![
            Ok(ModelEvent::ThinkingDelta("Weighing the ending".to_string())),
            Ok(ModelEvent::TextDelta("The final chap".to_string())),
        ]);
        let mut delivered = Vec::new();
        let result = StreamingSession::new(client)
            .run("prompt", &feasible_plan(), |_| {}, |d| delivered.push(d.to_string()))
            .await;

        match result {
            Err(StreamError::RequestFailed(message)) => {
                assert!(message.contains("message_stop"))
            }
            other => panic!("expected a truncated-stream error, got {:?}", other),
        }
        assert_eq!(delivered, ["The final chap"]);
    }

    struct StalledClient;

    #[async_trait]
    impl ModelClient for StalledClient {
        async fn stream(&self, _request: ModelRequest) -> Result<EventStream, StreamError> {
            Ok(stream::pending().boxed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_times_out() {
        let result = StreamingSession::new(Arc::new(StalledClient))
            .with_event_timeout(Duration::from_secs(30))
            .run("prompt", &feasible_plan(), |_| {}, |_| {})
            .await;
        assert!(matches!(result, Err(StreamError::Timeout(_))));
    }
}
