//! Incremental sync tracking and persisted task state
//!
//! A task's `last_exec_time` is the start time of its last completed run.
//! With incremental mode on, files not modified after it are skipped before
//! any output I/O. The value only ever moves forward.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::openlist::RemoteFile;
use crate::error::{Result, SyncError};
use crate::pipeline::RunReport;
use crate::pipeline::output::write_atomic;

/// Metadata-only change check for one run
#[derive(Debug, Clone, Copy)]
pub struct IncrementalTracker {
    enabled: bool,
    last_exec_time: i64,
}

impl IncrementalTracker {
    pub fn new(enabled: bool, last_exec_time: i64) -> Self {
        Self {
            enabled,
            last_exec_time,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    /// Already synced: incremental mode and not modified after the last run.
    /// A file without a known modification time is never considered synced.
    pub fn is_unchanged(&self, file: &RemoteFile) -> bool {
        self.enabled
            && file
                .modified_at
                .is_some_and(|modified_at| modified_at <= self.last_exec_time)
    }
}

/// Next `last_exec_time` after a completed run started at `run_started_at`
pub fn advance(previous: i64, run_started_at: i64) -> i64 {
    previous.max(run_started_at)
}

/// Persisted per-task state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub last_exec_time: i64,
    #[serde(default)]
    pub last_report: Option<RunReport>,
}

#[async_trait]
pub trait TaskStateStore: Send + Sync {
    async fn load(&self, task_id: &str) -> Result<TaskState>;

    async fn save(&self, task_id: &str, state: &TaskState) -> Result<()>;
}

/// In-process store, for on-demand runs without a state file and for tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: parking_lot::Mutex<HashMap<String, TaskState>>,
}

#[async_trait]
impl TaskStateStore for MemoryStateStore {
    async fn load(&self, task_id: &str) -> Result<TaskState> {
        Ok(self.states.lock().get(task_id).cloned().unwrap_or_default())
    }

    async fn save(&self, task_id: &str, state: &TaskState) -> Result<()> {
        self.states.lock().insert(task_id.to_string(), state.clone());
        Ok(())
    }
}

/// All task states in one JSON document, rewritten atomically on save
pub struct JsonStateStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, TaskState>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(HashMap::new()),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                SyncError::State(format!("corrupt state file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(SyncError::State(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl TaskStateStore for JsonStateStore {
    async fn load(&self, task_id: &str) -> Result<TaskState> {
        Ok(self.read_all().await?.remove(task_id).unwrap_or_default())
    }

    async fn save(&self, task_id: &str, state: &TaskState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(task_id.to_string(), state.clone());

        let raw = serde_json::to_vec_pretty(&all)
            .map_err(|e| SyncError::State(format!("cannot encode state: {e}")))?;
        write_atomic(&self.path, &raw)
            .await
            .map_err(|e| SyncError::write(&self.path, e))?;

        debug!(task_id = task_id, last_exec_time = state.last_exec_time, "Saved task state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(modified_at: impl Into<Option<i64>>) -> RemoteFile {
        RemoteFile {
            name: "a.mkv".into(),
            path: "/a.mkv".into(),
            size: 1,
            is_dir: false,
            modified_at: modified_at.into(),
            raw_url: "http://host/d/a.mkv".into(),
        }
    }

    #[test]
    fn test_unchanged_only_in_incremental_mode() {
        let tracker = IncrementalTracker::new(true, 1_000);
        assert!(tracker.is_unchanged(&file(999)));
        assert!(tracker.is_unchanged(&file(1_000)));
        assert!(!tracker.is_unchanged(&file(1_001)));

        let full = IncrementalTracker::new(false, 1_000);
        assert!(!full.is_unchanged(&file(10)));
    }

    #[test]
    fn test_unknown_mtime_is_always_changed() {
        assert!(!IncrementalTracker::new(true, 0).is_unchanged(&file(None)));
        assert!(!IncrementalTracker::new(true, i64::MAX).is_unchanged(&file(None)));
    }

    #[test]
    fn test_advance_is_monotonic() {
        assert_eq!(advance(100, 200), 200);
        assert_eq!(advance(300, 200), 300);
    }

    #[tokio::test]
    async fn test_json_store_roundtrip_keeps_other_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));

        assert_eq!(store.load("movies").await.unwrap(), TaskState::default());

        store
            .save("movies", &TaskState { last_exec_time: 5, last_report: None })
            .await
            .unwrap();
        store
            .save("shows", &TaskState { last_exec_time: 9, last_report: None })
            .await
            .unwrap();

        let reopened = JsonStateStore::new(dir.path().join("state.json"));
        assert_eq!(reopened.load("movies").await.unwrap().last_exec_time, 5);
        assert_eq!(reopened.load("shows").await.unwrap().last_exec_time, 9);
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonStateStore::new(path).load("movies").await,
            Err(SyncError::State(_))
        ));
    }
}
