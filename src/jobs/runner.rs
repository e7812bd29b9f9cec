//! Task registry and run coordination
//!
//! At most one run per task is in flight. A trigger that finds its task
//! already running is rejected, never queued.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::sync_task::{SyncJob, run_task};
use crate::config::{OpenListConfig, TaskConfig};
use crate::error::{Result, SyncError};
use crate::pipeline::RunReport;
use crate::services::extraction::NameExtractor;
use crate::services::incremental::TaskStateStore;
use crate::services::openlist::RemoteSource;
use crate::services::rate_limiter::RetryConfig;
use crate::services::refresh::MediaServer;

/// Per-run tuning shared by every task
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Files processed concurrently within one run
    pub workers: usize,
    pub retry: RetryConfig,
    pub extraction_timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            retry: RetryConfig::default(),
            extraction_timeout: Duration::from_secs(30),
        }
    }
}

/// Task ids with a run in flight, each with the token that cancels it
#[derive(Default)]
struct RunLocks {
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl RunLocks {
    fn acquire(&self, task_id: &str) -> Result<RunGuard<'_>> {
        let mut running = self.running.lock();
        if running.contains_key(task_id) {
            return Err(SyncError::AlreadyRunning(task_id.to_string()));
        }
        let token = CancellationToken::new();
        running.insert(task_id.to_string(), token.clone());
        Ok(RunGuard {
            locks: self,
            task_id: task_id.to_string(),
            token,
        })
    }
}

/// Releases the task's run slot when dropped, however the run ends
struct RunGuard<'a> {
    locks: &'a RunLocks,
    task_id: String,
    token: CancellationToken,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.locks.running.lock().remove(&self.task_id);
    }
}

struct SourceEntry {
    config: Arc<OpenListConfig>,
    client: Arc<dyn RemoteSource>,
}

/// Owns the task list and the collaborators runs are built from
pub struct TaskRunner {
    tasks: BTreeMap<String, Arc<TaskConfig>>,
    sources: HashMap<String, SourceEntry>,
    media_servers: HashMap<String, Arc<dyn MediaServer>>,
    extractor: Option<Arc<dyn NameExtractor>>,
    store: Arc<dyn TaskStateStore>,
    settings: RunSettings,
    locks: RunLocks,
    reports_tx: broadcast::Sender<RunReport>,
}

impl TaskRunner {
    pub fn new(tasks: Vec<TaskConfig>, store: Arc<dyn TaskStateStore>) -> Self {
        let (reports_tx, _) = broadcast::channel(64);
        Self {
            tasks: tasks
                .into_iter()
                .map(|task| (task.id.clone(), Arc::new(task)))
                .collect(),
            sources: HashMap::new(),
            media_servers: HashMap::new(),
            extractor: None,
            store,
            settings: RunSettings::default(),
            locks: RunLocks::default(),
            reports_tx,
        }
    }

    pub fn with_source(mut self, config: OpenListConfig, client: Arc<dyn RemoteSource>) -> Self {
        self.sources.insert(
            config.id.clone(),
            SourceEntry {
                config: Arc::new(config),
                client,
            },
        );
        self
    }

    /// Media server refreshed after runs of `task_id`
    pub fn with_media_server(mut self, task_id: &str, server: Arc<dyn MediaServer>) -> Self {
        self.media_servers.insert(task_id.to_string(), server);
        self
    }

    /// Extractor used by tasks with scraping enabled
    pub fn with_extractor(mut self, extractor: Arc<dyn NameExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<TaskConfig>> {
        self.tasks.values()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.locks.running.lock().contains_key(task_id)
    }

    /// Subscribe to the reports of every finished run
    pub fn subscribe(&self) -> broadcast::Receiver<RunReport> {
        self.reports_tx.subscribe()
    }

    /// Run `task_id` now and wait for its report.
    ///
    /// Fails fast with `AlreadyRunning` if a run of the same task is in
    /// flight, and with `TaskInactive` for deactivated tasks.
    pub async fn trigger(&self, task_id: &str) -> Result<RunReport> {
        let task = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| SyncError::TaskNotFound(task_id.to_string()))?;
        if !task.is_active {
            return Err(SyncError::TaskInactive(task_id.to_string()));
        }
        let source = self.sources.get(&task.openlist_id).ok_or_else(|| {
            SyncError::config(format!(
                "task {} references unknown OpenList source {}",
                task.id, task.openlist_id
            ))
        })?;

        let guard = self.locks.acquire(task_id)?;
        let job = SyncJob {
            source_config: source.config.clone(),
            source: source.client.clone(),
            media_server: self.media_servers.get(task_id).cloned(),
            extractor: self.extractor.clone(),
            store: self.store.clone(),
            settings: self.settings.clone(),
            task,
        };
        let report = run_task(job, guard.token.clone()).await;
        drop(guard);

        // No subscribers is fine
        let _ = self.reports_tx.send(report.clone());
        Ok(report)
    }

    /// Request cancellation of a running task. Files already being written
    /// finish; no new ones start. Returns false if the task was not running.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.locks.running.lock().get(task_id) {
            Some(token) => {
                info!(task_id = task_id, "Cancelling sync run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every run in flight and wait up to `grace` for each to save its
    /// state and report. Returns false if some run outlived the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        for token in self.locks.running.lock().values() {
            token.cancel();
        }
        let drained = async {
            while !self.locks.running.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lock_is_exclusive_and_released_on_drop() {
        let locks = RunLocks::default();
        let guard = locks.acquire("movies").unwrap();
        assert!(matches!(
            locks.acquire("movies"),
            Err(SyncError::AlreadyRunning(id)) if id == "movies"
        ));
        // Other tasks are independent
        let other = locks.acquire("shows").unwrap();

        drop(guard);
        assert!(locks.acquire("movies").is_ok());
        drop(other);
    }
}
