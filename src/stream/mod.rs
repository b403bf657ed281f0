//! Streaming of thinking-enabled model responses
//!
//! - `client`: the remote model seam and the Anthropic Messages implementation
//! - `events`: typed stream events and SSE frame decoding
//! - `session`: drives one request and accumulates both channels

pub mod client;
pub mod events;
pub mod session;

pub use client::{decode_body, AnthropicClient, EventStream, ModelClient, ModelRequest, StreamError};
pub use events::{ModelEvent, SseDecoder, UsageMetadata};
pub use session::{StreamAccumulator, StreamingSession};
