//! Model stream events and server-sent-event decoding
//!
//! The Messages API streams `text/event-stream` frames whose `data:` payload is
//! a JSON object tagged by `type`. Only three payloads matter to a run:
//! - `content_block_delta` carrying a `thinking_delta` or `text_delta`
//! - `message_start`, whose usage block holds the cache statistics
//! - `error`, which terminates the stream
//!
//! Everything else (`ping`, block start/stop, `message_delta`) is skipped.

use serde::{Deserialize, Serialize};

use super::client::StreamError;

/// Typed event delivered to the streaming session, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    ThinkingDelta(String),
    TextDelta(String),
    Usage(UsageMetadata),
    MessageStop,
}

/// Token usage reported at stream start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cache_creation_input_tokens: usize,
    pub cache_read_input_tokens: usize,
}

impl UsageMetadata {
    pub fn has_cache_activity(&self) -> bool {
        self.cache_creation_input_tokens > 0 || self.cache_read_input_tokens > 0
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart { message: WireMessage },
    ContentBlockDelta { delta: WireDelta },
    MessageStop,
    Error { error: WireError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

// Cache fields arrive as null when caching is not in play
#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<usize>,
    #[serde(default)]
    output_tokens: Option<usize>,
    #[serde(default)]
    cache_creation_input_tokens: Option<usize>,
    #[serde(default)]
    cache_read_input_tokens: Option<usize>,
}

impl From<WireUsage> for UsageMetadata {
    fn from(usage: WireUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
            cache_creation_input_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_input_tokens: usage.cache_read_input_tokens.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Parse one `data:` payload into a model event
pub fn parse_event_data(data: &str) -> Result<Option<ModelEvent>, StreamError> {
    let event: WireEvent =
        serde_json::from_str(data).map_err(|e| StreamError::InvalidEvent(e.to_string()))?;

    match event {
        WireEvent::MessageStart { message } => {
            Ok(message.usage.map(|usage| ModelEvent::Usage(usage.into())))
        }
        WireEvent::ContentBlockDelta { delta } => Ok(match delta {
            WireDelta::ThinkingDelta { thinking } => Some(ModelEvent::ThinkingDelta(thinking)),
            WireDelta::TextDelta { text } => Some(ModelEvent::TextDelta(text)),
            WireDelta::Other => None,
        }),
        WireEvent::MessageStop => Ok(Some(ModelEvent::MessageStop)),
        WireEvent::Error { error } => Err(StreamError::UpstreamError(format!(
            "{}: {}",
            error.kind, error.message
        ))),
        WireEvent::Other => Ok(None),
    }
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Chunks may split frames, lines, or multi-byte characters anywhere; only
/// complete frames are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events from every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<ModelEvent>, StreamError> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = decode_frame(&frame[..end])? {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Decode a trailing frame left without its blank-line terminator
    pub fn finish(&mut self) -> Result<Option<ModelEvent>, StreamError> {
        let frame = std::mem::take(&mut self.buffer);
        if frame.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        decode_frame(&frame)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn decode_frame(frame: &[u8]) -> Result<Option<ModelEvent>, StreamError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| StreamError::InvalidEvent(format!("frame is not UTF-8: {}", e)))?;

    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();

    if data.is_empty() {
        return Ok(None);
    }

    parse_event_data(&data.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const THINKING_FRAME: &str = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"Chapter one drags.\"}}\n\n";

    #[test]
    fn test_decodes_thinking_and_text_deltas() {
        let mut decoder = SseDecoder::new();
        let body = format!(
            "{}event: content_block_delta\ndata: {{\"type\":\"content_block_delta\",\"index\":1,\"delta\":{{\"type\":\"text_delta\",\"text\":\"Tighten the opening.\"}}}}\n\n",
            THINKING_FRAME
        );
        let events = decoder.push(body.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                ModelEvent::ThinkingDelta("Chapter one drags.".to_string()),
                ModelEvent::TextDelta("Tighten the opening.".to_string()),
            ]
        );
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let (head, tail) = THINKING_FRAME.as_bytes().split_at(40);
        assert!(decoder.push(head).unwrap().is_empty());
        let events = decoder.push(tail).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_multibyte_character_split() {
        let frame = "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"caf\u{e9}\"}}\n\n";
        let bytes = frame.as_bytes();
        let split = frame.find('\u{e9}').unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        let events = decoder.push(&bytes[split..]).unwrap();
        assert_eq!(events, vec![ModelEvent::TextDelta("caf\u{e9}".to_string())]);
    }

    #[test]
    fn test_crlf_frames() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push(b"event: message_stop\r\ndata: {\"type\":\"message_stop\"}\r\n\r\n")
            .unwrap();
        assert_eq!(events, vec![ModelEvent::MessageStop]);
    }

    #[test]
    fn test_message_start_usage_with_null_cache_fields() {
        let event = parse_event_data(
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":1200,"cache_creation_input_tokens":null,"cache_read_input_tokens":800,"output_tokens":1}}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Some(ModelEvent::Usage(UsageMetadata {
                input_tokens: 1200,
                output_tokens: 1,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: 800,
            }))
        );
    }

    #[test]
    fn test_skips_ping_and_signature() {
        assert_eq!(parse_event_data(r#"{"type":"ping"}"#).unwrap(), None);
        assert_eq!(
            parse_event_data(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"abc"}}"#
            )
            .unwrap(),
            None
        );
    }

    #[test]
    fn test_error_event_terminates() {
        let result = parse_event_data(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert!(matches!(result, Err(StreamError::UpstreamError(msg)) if msg == "overloaded_error: Overloaded"));
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"message_stop\"}").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), Some(ModelEvent::MessageStop));
        assert_eq!(decoder.finish().unwrap(), None);
    }
}
