//! Run history persistence for finished workflow runs.
//!
//! This module exposes the [`RunHistoryStore`] abstraction along with a
//! JSON-backed implementation (tilde expansion, config directory fallback,
//! environment override) and an in-memory variant for tests.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use reqterm_types::WorkflowHistoryEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::path_processing::{config_file_path, expand_tilde};
use crate::redact_sensitive;

/// Environment variable controlling the history file location.
pub const HISTORY_PATH_ENV: &str = "REQTERM_HISTORY_PATH";

/// Default filename for the persisted history store.
pub const HISTORY_FILE_NAME: &str = "history.json";

/// Maximum number of entries retained by the store.
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Errors surfaced by history store operations.
#[derive(Debug, Error)]
pub enum HistoryStoreError {
    /// I/O failure while reading or writing the history file.
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Default, Serialize, Deserialize)]
struct HistoryFile {
    entries: VecDeque<WorkflowHistoryEntry>,
}

impl HistoryFile {
    fn push(&mut self, entry: WorkflowHistoryEntry, limit: usize) {
        self.entries.push_front(sanitize_entry(entry));
        self.truncate(limit);
    }

    fn truncate(&mut self, limit: usize) {
        while self.entries.len() > limit {
            self.entries.pop_back();
        }
    }

    fn for_workflow(&self, workflow_id: &str) -> Vec<WorkflowHistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.workflow_id == workflow_id)
            .cloned()
            .collect()
    }
}

fn sanitize_entry(mut entry: WorkflowHistoryEntry) -> WorkflowHistoryEntry {
    entry.summary = redact_sensitive(&entry.summary);
    entry.report = redact_sensitive(&entry.report);
    entry.definition = redact_sensitive(&entry.definition);
    entry
}

/// Shared trait implemented by run history backends.
pub trait RunHistoryStore: Send + Sync {
    /// Record a finished run as the newest entry.
    fn append(&self, entry: WorkflowHistoryEntry) -> Result<(), HistoryStoreError>;

    /// List all entries, ordered from most recent to oldest.
    fn entries(&self) -> Result<Vec<WorkflowHistoryEntry>, HistoryStoreError>;

    /// List entries recorded for one workflow identifier, most recent first.
    fn entries_for_workflow(&self, workflow_id: &str) -> Result<Vec<WorkflowHistoryEntry>, HistoryStoreError>;

    /// Truncate history to the provided maximum length.
    fn truncate(&self, max_entries: usize) -> Result<(), HistoryStoreError>;
}

/// JSON-backed run history persisted on disk.
pub struct JsonRunHistory {
    path: PathBuf,
    entries: Mutex<HistoryFile>,
    max_entries: usize,
}

impl JsonRunHistory {
    /// Create a new store at the provided path (or the default path when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(path: P, max_entries: usize) -> Result<Self, HistoryStoreError> {
        let resolved_path = match path.into() {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_history_path(),
        };

        let file = load_history_file(&resolved_path)?;
        Ok(Self {
            path: resolved_path,
            entries: Mutex::new(file),
            max_entries,
        })
    }

    /// Initialize a store using the default settings.
    pub fn with_defaults() -> Result<Self, HistoryStoreError> {
        Self::new(None::<PathBuf>, DEFAULT_HISTORY_LIMIT)
    }

    /// Access the underlying history path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, history_file: &HistoryFile) -> Result<(), HistoryStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(history_file)?;
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), entries = history_file.entries.len(), "run history saved");
        Ok(())
    }
}

impl RunHistoryStore for JsonRunHistory {
    fn append(&self, entry: WorkflowHistoryEntry) -> Result<(), HistoryStoreError> {
        let mut entries = self.entries.lock().expect("history lock poisoned");
        entries.push(entry, self.max_entries);
        self.save_locked(&entries)
    }

    fn entries(&self) -> Result<Vec<WorkflowHistoryEntry>, HistoryStoreError> {
        let entries = self.entries.lock().expect("history lock poisoned");
        Ok(entries.entries.iter().cloned().collect())
    }

    fn entries_for_workflow(&self, workflow_id: &str) -> Result<Vec<WorkflowHistoryEntry>, HistoryStoreError> {
        let entries = self.entries.lock().expect("history lock poisoned");
        Ok(entries.for_workflow(workflow_id))
    }

    fn truncate(&self, max_entries: usize) -> Result<(), HistoryStoreError> {
        let mut entries = self.entries.lock().expect("history lock poisoned");
        entries.truncate(max_entries);
        self.save_locked(&entries)
    }
}

/// In-memory run history primarily used for unit testing.
#[derive(Default)]
pub struct InMemoryRunHistory {
    entries: Mutex<HistoryFile>,
}

impl InMemoryRunHistory {
    /// Create an empty in-memory history store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunHistoryStore for InMemoryRunHistory {
    fn append(&self, entry: WorkflowHistoryEntry) -> Result<(), HistoryStoreError> {
        let mut entries = self.entries.lock().expect("history lock poisoned");
        entries.push(entry, DEFAULT_HISTORY_LIMIT);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<WorkflowHistoryEntry>, HistoryStoreError> {
        let entries = self.entries.lock().expect("history lock poisoned");
        Ok(entries.entries.iter().cloned().collect())
    }

    fn entries_for_workflow(&self, workflow_id: &str) -> Result<Vec<WorkflowHistoryEntry>, HistoryStoreError> {
        let entries = self.entries.lock().expect("history lock poisoned");
        Ok(entries.for_workflow(workflow_id))
    }

    fn truncate(&self, max_entries: usize) -> Result<(), HistoryStoreError> {
        let mut entries = self.entries.lock().expect("history lock poisoned");
        entries.truncate(max_entries);
        Ok(())
    }
}

fn default_history_path() -> PathBuf {
    config_file_path(HISTORY_PATH_ENV, HISTORY_FILE_NAME)
}

fn load_history_file(path: &Path) -> Result<HistoryFile, HistoryStoreError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<HistoryFile>(&content) {
            Ok(file) => Ok(file),
            Err(error) => {
                warn!("Failed to parse history file at {}: {}", path.display(), error);
                Ok(HistoryFile::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(HistoryFile::default()),
        Err(error) => Err(HistoryStoreError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reqterm_types::RunOutcome;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn entry(workflow_id: &str, summary: &str) -> WorkflowHistoryEntry {
        WorkflowHistoryEntry {
            executed_at: Utc::now(),
            environment: "dev".into(),
            workflow_id: workflow_id.into(),
            workflow_name: workflow_id.into(),
            outcome: RunOutcome::Succeeded,
            summary: summary.into(),
            duration_ms: 12,
            report: "report".into(),
            definition: "# @workflow demo".into(),
        }
    }

    #[test]
    fn in_memory_store_orders_newest_first() {
        let store = InMemoryRunHistory::new();
        store.append(entry("wf", "first")).unwrap();
        store.append(entry("wf", "second")).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].summary, "second");
    }

    #[test]
    fn json_store_persists_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = JsonRunHistory::new(Some(path.clone()), 10).unwrap();
        store.append(entry("wf", "done")).unwrap();

        drop(store);
        let reloaded = JsonRunHistory::new(Some(path), 10).unwrap();
        let entries = reloaded.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].summary, "done");
    }

    #[test]
    fn json_store_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = JsonRunHistory::new(Some(path.clone()), 2).unwrap();

        for index in 0..3 {
            store.append(entry(&format!("wf{index}"), "run")).unwrap();
        }

        drop(store);
        let reloaded = JsonRunHistory::new(Some(path), 2).unwrap();
        let entries = reloaded.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].workflow_id, "wf2");
    }

    #[test]
    fn default_path_honors_env_override() {
        let override_path = "~/custom/history.json";
        temp_env::with_var(HISTORY_PATH_ENV, Some(override_path), || {
            assert_eq!(default_history_path(), expand_tilde(override_path));
        });
    }

    #[test]
    fn invalid_json_returns_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonRunHistory::new(Some(path), 10).unwrap();
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn filters_entries_by_workflow() {
        let store = InMemoryRunHistory::new();
        store.append(entry("docs.yaml#login", "a")).unwrap();
        store.append(entry("docs.yaml#checkout", "b")).unwrap();

        let entries = store.entries_for_workflow("docs.yaml#login").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].summary, "a");
    }

    #[test]
    fn redacts_secrets_before_storing() {
        let store = InMemoryRunHistory::new();
        let mut secret = entry("wf", "ok");
        secret.report = "GET /things?API_KEY=supersecret".into();
        store.append(secret).unwrap();

        let stored = store.entries().unwrap();
        assert!(!stored[0].report.contains("supersecret"));
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = Arc::new(JsonRunHistory::new(Some(path), 10).unwrap());
        let handles: Vec<_> = (0..5)
            .map(|index| {
                let handle_store = Arc::clone(&store);
                thread::spawn(move || handle_store.append(entry(&format!("wf{index}"), "run")).unwrap())
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.entries().unwrap().len(), 5);
    }
}
