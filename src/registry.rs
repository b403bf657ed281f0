//! Per-tool record of the most recent run's artifact paths
//!
//! Last-write-wins: every run starts with `clear`, which discards the previous
//! run's paths (the files stay on disk). Nothing is persisted across restarts.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies the run that last cleared a tool's entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub tool_id: String,
    pub run_id: Uuid,
}

#[derive(Debug, Default)]
struct RegistryEntry {
    run_id: Uuid,
    paths: Vec<PathBuf>,
}

/// Registry of artifact paths keyed by tool identifier
#[derive(Debug, Default)]
pub struct RunRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a clean slate for `tool_id`, returning the new run's ticket
    pub fn clear(&self, tool_id: &str) -> RunTicket {
        let run_id = Uuid::new_v4();
        self.entries.insert(
            tool_id.to_string(),
            RegistryEntry {
                run_id,
                paths: Vec::new(),
            },
        );
        debug!("Registry cleared for {} (run {})", tool_id, run_id);

        RunTicket {
            tool_id: tool_id.to_string(),
            run_id,
        }
    }

    /// Append a path to the tool's current run
    pub fn record(&self, tool_id: &str, path: impl AsRef<Path>) {
        self.entries
            .entry(tool_id.to_string())
            .or_default()
            .paths
            .push(path.as_ref().to_path_buf());
    }

    /// Append a path only if `ticket` still owns the tool's entry.
    ///
    /// Returns `false` when a later `clear` superseded the run.
    pub fn record_run(&self, ticket: &RunTicket, path: impl AsRef<Path>) -> bool {
        match self.entries.get_mut(&ticket.tool_id) {
            Some(mut entry) if entry.run_id == ticket.run_id => {
                entry.paths.push(path.as_ref().to_path_buf());
                true
            }
            _ => {
                warn!(
                    "Dropping artifact {} from superseded run {} of {}",
                    path.as_ref().display(),
                    ticket.run_id,
                    ticket.tool_id
                );
                false
            }
        }
    }

    /// Paths produced by the tool's most recent run
    pub fn list(&self, tool_id: &str) -> Vec<PathBuf> {
        self.entries
            .get(tool_id)
            .map(|entry| entry.paths.clone())
            .unwrap_or_default()
    }
}
