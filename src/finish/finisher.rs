//! Response finishing: clean the answer, measure it, persist both channels

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::markdown::{strip_markdown, word_count};
use crate::budget::{TokenCounter, TokenizerError};
use crate::registry::RunTicket;
use crate::stream::{StreamAccumulator, UsageMetadata};

/// Finisher errors
#[derive(Debug, thiserror::Error)]
pub enum FinishError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token count failed: {0}")]
    Tokenizer(#[from] TokenizerError),
}

/// Durable destination for finished artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write_file(&self, path: &Path, content: &str) -> Result<(), FinishError>;
}

/// Writes artifacts to the local filesystem, creating parent directories
#[derive(Debug, Default, Clone)]
pub struct FsArtifactStore;

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write_file(&self, path: &Path, content: &str) -> Result<(), FinishError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FinishError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        // Artifacts are write-once; an existing file is never replaced
        let write = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await
        };

        write.await.map_err(|source| FinishError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Where one tool run's artifacts go.
///
/// File names carry the start time and a short run id, so two runs of the
/// same tool never share a name even within one second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTarget {
    pub tool_id: String,
    pub destination: PathBuf,
    pub run_id: Uuid,
}

impl ArtifactTarget {
    /// Target for a standalone run with a fresh run id
    pub fn new(tool_id: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            tool_id: tool_id.into(),
            destination: destination.into(),
            run_id: Uuid::new_v4(),
        }
    }

    /// Target for the run that owns `ticket`
    pub fn for_run(ticket: &RunTicket, destination: impl Into<PathBuf>) -> Self {
        Self {
            tool_id: ticket.tool_id.clone(),
            destination: destination.into(),
            run_id: ticket.run_id,
        }
    }

    /// `<YYYYMMDD_HHMMSS>_<first 8 hex digits of the run id>`
    pub fn stamp(&self, started_at: DateTime<Local>) -> String {
        let run = self.run_id.simple().to_string();
        format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), &run[..8])
    }

    fn report_path(&self, stamp: &str) -> PathBuf {
        self.destination.join(format!("{}_{}.txt", self.tool_id, stamp))
    }

    fn reasoning_path(&self, stamp: &str) -> PathBuf {
        self.destination
            .join(format!("{}_thinking_{}.txt", self.tool_id, stamp))
    }
}

/// A finished report and its reasoning-trace companion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub tool_id: String,
    pub report_path: PathBuf,
    pub reasoning_path: PathBuf,
    pub elapsed: Duration,
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub word_count: usize,
    pub usage: Option<UsageMetadata>,
}

impl RunArtifact {
    pub fn paths(&self) -> [&Path; 2] {
        [self.report_path.as_path(), self.reasoning_path.as_path()]
    }
}

/// Turns an accumulated stream into persisted artifacts
pub struct ResponseFinisher {
    counter: Arc<dyn TokenCounter>,
    store: Arc<dyn ArtifactStore>,
}

impl ResponseFinisher {
    pub fn new(counter: Arc<dyn TokenCounter>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { counter, store }
    }

    /// Persist the cleaned answer and the raw reasoning trace.
    ///
    /// An empty answer yields a zero-length report.
    pub async fn finish(
        &self,
        target: &ArtifactTarget,
        accumulator: StreamAccumulator,
        prompt_tokens: usize,
        started_at: DateTime<Local>,
    ) -> Result<RunArtifact, FinishError> {
        let elapsed = (Local::now() - started_at).to_std().unwrap_or_default();

        let visible = accumulator.visible_text();
        let words = word_count(&visible);
        let response_tokens = if visible.is_empty() {
            0
        } else {
            self.counter.count(&visible).await?
        };
        let report = strip_markdown(&visible);

        let stamp = target.stamp(started_at);
        let report_path = target.report_path(&stamp);
        let reasoning_path = target.reasoning_path(&stamp);

        let artifact = RunArtifact {
            tool_id: target.tool_id.clone(),
            report_path,
            reasoning_path,
            elapsed,
            prompt_tokens,
            response_tokens,
            word_count: words,
            usage: accumulator.usage().cloned(),
        };

        let trace = reasoning_trace(&accumulator, &artifact);

        debug!("Writing report to {}", artifact.report_path.display());
        self.store.write_file(&artifact.report_path, &report).await?;
        self.store.write_file(&artifact.reasoning_path, &trace).await?;

        info!(
            "Finished {}: {} words, {} response tokens in {:.1}s",
            artifact.tool_id,
            artifact.word_count,
            artifact.response_tokens,
            artifact.elapsed.as_secs_f64()
        );

        Ok(artifact)
    }
}

fn reasoning_trace(accumulator: &StreamAccumulator, artifact: &RunArtifact) -> String {
    let mut trace = accumulator.thinking_text();
    if !trace.is_empty() && !trace.ends_with('\n') {
        trace.push('\n');
    }

    let secs = artifact.elapsed.as_secs();
    trace.push_str("\n---\nDetails:\n");
    trace.push_str(&format!("Tool: {}\n", artifact.tool_id));
    trace.push_str(&format!("Elapsed time: {}m {}s\n", secs / 60, secs % 60));
    trace.push_str(&format!("Report word count: {}\n", artifact.word_count));
    trace.push_str(&format!("Prompt tokens: {}\n", artifact.prompt_tokens));
    trace.push_str(&format!("Response tokens: {}\n", artifact.response_tokens));

    if let Some(usage) = artifact.usage.as_ref().filter(|u| u.has_cache_activity()) {
        trace.push_str(&format!(
            "Cache: {} tokens written, {} tokens read\n",
            usage.cache_creation_input_tokens, usage.cache_read_input_tokens
        ));
    }

    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::WordBasedCounter;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<HashMap<PathBuf, String>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn write_file(&self, path: &Path, content: &str) -> Result<(), FinishError> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), content.to_string());
            Ok(())
        }
    }

    fn finisher(store: Arc<MemoryStore>) -> ResponseFinisher {
        ResponseFinisher::new(Arc::new(WordBasedCounter::default()), store)
    }

    #[tokio::test]
    async fn test_finish_writes_clean_report_and_trace() {
        let store = Arc::new(MemoryStore::default());
        let mut accumulator = StreamAccumulator::new();
        accumulator.push_thinking("The dialogue ");
        accumulator.push_thinking("feels stiff.");
        accumulator.push_visible("## Notes\n");
        accumulator.push_visible("- Loosen the **dialogue** in scene two.");
        accumulator.record_usage(UsageMetadata {
            cache_read_input_tokens: 900,
            ..UsageMetadata::default()
        });

        let started_at = Local::now() - chrono::Duration::seconds(75);
        let target = ArtifactTarget::new("copy_editing", "/projects/novel");
        let artifact = finisher(store.clone())
            .finish(&target, accumulator, 1_200, started_at)
            .await
            .unwrap();

        let stamp = target.stamp(started_at);
        assert!(stamp.starts_with(&started_at.format("%Y%m%d_%H%M%S").to_string()));
        assert_eq!(
            artifact.report_path,
            PathBuf::from(format!("/projects/novel/copy_editing_{}.txt", stamp))
        );
        assert_eq!(
            artifact.reasoning_path,
            PathBuf::from(format!("/projects/novel/copy_editing_thinking_{}.txt", stamp))
        );
        assert!(artifact.elapsed >= Duration::from_secs(75));
        assert_eq!(artifact.word_count, 9);
        assert_eq!(artifact.response_tokens, 12); // 9 * 1.3 = 11.7 -> 12

        let files = store.files.lock().unwrap();
        assert_eq!(
            files[&artifact.report_path],
            "Notes\nLoosen the dialogue in scene two."
        );
        let trace = &files[&artifact.reasoning_path];
        assert!(trace.starts_with("The dialogue feels stiff.\n"));
        assert!(trace.contains("Prompt tokens: 1200"));
        assert!(trace.contains("Elapsed time: 1m 15s"));
        assert!(trace.contains("900 tokens read"));
    }

    #[tokio::test]
    async fn test_empty_answer_gives_empty_report() {
        let store = Arc::new(MemoryStore::default());
        let target = ArtifactTarget::new("proofreading", "/tmp/out");
        let artifact = finisher(store.clone())
            .finish(&target, StreamAccumulator::new(), 10, Local::now())
            .await
            .unwrap();

        assert_eq!(artifact.word_count, 0);
        assert_eq!(artifact.response_tokens, 0);
        assert_eq!(store.files.lock().unwrap()[&artifact.report_path], "");
    }

    #[tokio::test]
    async fn test_fs_store_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("line_editing_1.txt");
        FsArtifactStore.write_file(&path, "clean prose").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "clean prose");
    }

    #[tokio::test]
    async fn test_fs_store_never_replaces_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proofreading_1.txt");
        FsArtifactStore.write_file(&path, "first").await.unwrap();

        let second = FsArtifactStore.write_file(&path, "second").await;
        assert!(matches!(second, Err(FinishError::Write { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn test_targets_for_different_runs_never_share_names() {
        let registry = crate::registry::RunRegistry::new();
        let started_at = Local::now();
        let first = ArtifactTarget::for_run(&registry.clear("proofreading"), "/out");
        let second = ArtifactTarget::for_run(&registry.clear("proofreading"), "/out");

        assert_ne!(first.stamp(started_at), second.stamp(started_at));
        assert_eq!(first.tool_id, "proofreading");
    }

    #[tokio::test]
    async fn test_fs_store_surfaces_write_failure() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot be used as a directory
        let path = file.path().join("report.txt");
        let result = FsArtifactStore.write_file(&path, "text").await;
        assert!(matches!(result, Err(FinishError::Write { .. })));
    }
}
