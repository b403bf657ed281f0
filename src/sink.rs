//! Progress and diagnostic output sinks

use std::io::Write;
use std::sync::Mutex;

use tracing::info;

/// Receives progress text from a run; the core never reads it back
pub trait OutputSink: Send + Sync {
    fn emit(&self, text: &str);
}

/// Forwards every message to the tracing subscriber
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&self, text: &str) {
        info!(target: "manuscript_engine::progress", "{}", text.trim_end());
    }
}

/// Writes messages to stdout as they arrive
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects messages in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contents(&self) -> String {
        self.lines().concat()
    }
}

impl OutputSink for BufferSink {
    fn emit(&self, text: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_keeps_order() {
        let sink = BufferSink::new();
        sink.emit("Prompt tokens: 10\n");
        sink.emit("Done\n");
        assert_eq!(sink.lines(), vec!["Prompt tokens: 10\n", "Done\n"]);
        assert_eq!(sink.contents(), "Prompt tokens: 10\nDone\n");
    }
}
