//! Remote model client for thinking-enabled streaming requests

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::events::{ModelEvent, SseDecoder};
use crate::budget::{TokenCounter, TokenizerError};
use crate::config::ModelConfig;

/// Streaming error types
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Budget plan is infeasible; refusing to open a stream")]
    InfeasiblePlan,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StreamError::Timeout(e.to_string())
        } else {
            StreamError::RequestFailed(e.to_string())
        }
    }
}

/// Ordered, at-most-once event stream for one request
pub type EventStream = BoxStream<'static, Result<ModelEvent, StreamError>>;

/// What a single streaming request asks of the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub prompt: String,
    pub max_output_tokens: usize,
    pub thinking_budget_tokens: usize,
}

/// Remote model able to stream a thinking-enabled response.
///
/// A complete response ends with [`ModelEvent::MessageStop`]; a stream that
/// closes without it is treated as truncated.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Open the request; transport failures before the first event surface here
    async fn stream(&self, request: ModelRequest) -> Result<EventStream, StreamError>;
}

/// Anthropic Messages API client
pub struct AnthropicClient {
    http: Client,
    config: ModelConfig,
}

impl AnthropicClient {
    /// Create a new client
    pub fn new(config: ModelConfig) -> Result<Self, StreamError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| StreamError::RequestFailed(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let mut req = self
            .http
            .post(&url)
            .header("anthropic-version", &self.config.anthropic_version);

        if let Some(api_key) = &self.config.api_key {
            req = req.header("x-api-key", api_key.expose_secret());
        }

        if !self.config.betas.is_empty() {
            req = req.header("anthropic-beta", self.config.betas.join(","));
        }

        req
    }

    fn build_body(&self, request: &ModelRequest) -> MessagesRequest {
        // The API rejects enabled thinking with a zero budget
        let thinking = (request.thinking_budget_tokens > 0).then(|| ThinkingParam {
            kind: "enabled",
            budget_tokens: request.thinking_budget_tokens,
        });

        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: request.max_output_tokens,
            thinking,
            messages: vec![UserMessage {
                role: "user",
                content: request.prompt.clone(),
            }],
            stream: true,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn stream(&self, request: ModelRequest) -> Result<EventStream, StreamError> {
        let body = self.build_body(&request);

        debug!(
            "Opening stream: model={} max_tokens={} thinking={}",
            body.model, request.max_output_tokens, request.thinking_budget_tokens
        );

        let response = self.request("/v1/messages").json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Model request rejected with status {}", status);
            return Err(StreamError::UpstreamError(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        Ok(decode_body(response.bytes_stream()))
    }
}

#[async_trait]
impl TokenCounter for AnthropicClient {
    async fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        let body = CountTokensRequest {
            model: self.config.model.clone(),
            messages: vec![UserMessage {
                role: "user",
                content: text.to_string(),
            }],
        };

        let response = self
            .request("/v1/messages/count_tokens")
            .json(&body)
            .send()
            .await
            .map_err(|e| TokenizerError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TokenizerError::RequestFailed(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        let counted: CountTokensResponse = response
            .json()
            .await
            .map_err(|e| TokenizerError::InvalidResponse(e.to_string()))?;

        Ok(counted.input_tokens)
    }
}

/// Turn a raw SSE byte stream into model events.
///
/// The byte stream is owned by the returned stream, so dropping it closes the
/// connection.
pub fn decode_body<S, E>(body: S) -> EventStream
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<StreamError> + Send + 'static,
{
    let state = (Box::pin(body), SseDecoder::new(), VecDeque::new(), false);

    stream::unfold(state, |(mut body, mut decoder, mut pending, mut done)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (body, decoder, pending, done)));
            }
            if done {
                return None;
            }

            match body.next().await {
                Some(Ok(chunk)) => match decoder.push(&chunk) {
                    Ok(events) => pending.extend(events.into_iter().map(Ok)),
                    Err(e) => {
                        pending.push_back(Err(e));
                        done = true;
                    }
                },
                Some(Err(e)) => {
                    pending.push_back(Err(e.into()));
                    done = true;
                }
                None => {
                    match decoder.finish() {
                        Ok(Some(event)) => pending.push_back(Ok(event)),
                        Ok(None) => {}
                        Err(e) => pending.push_back(Err(e)),
                    }
                    done = true;
                }
            }
        }
    })
    .boxed()
}

// Wire types for the Messages API
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingParam>,
    messages: Vec<UserMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ThinkingParam {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: usize,
}

#[derive(Debug, Serialize)]
struct UserMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct CountTokensRequest {
    model: String,
    messages: Vec<UserMessage>,
}

#[derive(Debug, Deserialize)]
struct CountTokensResponse {
    input_tokens: usize,
}
