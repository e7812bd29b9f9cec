//! Per-file processing context and run-scoped statistics

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::{OpenListConfig, TaskConfig};
use crate::error::{Result, SyncError};
use crate::services::file_classifier::FileType;
use crate::services::name_resolver::NameResolution;
use crate::services::openlist::RemoteFile;
use super::stages::ClaimTicket;

/// Lifecycle of one file within a run. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    Initialized,
    Processing,
    Success,
    Skipped,
    Failed,
}

impl ProcessingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Skipped | Self::Failed)
    }

    pub fn can_transition_to(self, next: ProcessingState) -> bool {
        match (self, next) {
            (Self::Initialized, Self::Processing) => true,
            (Self::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Aggregate counters for one run, shared by every file's context
#[derive(Debug, Default)]
pub struct ProcessingStats {
    total: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    by_category: [AtomicU64; FileType::ALL.len()],
}

impl ProcessingStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_seen(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_category(&self, file_type: FileType) {
        self.by_category[file_type.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_files: self.total.load(Ordering::Relaxed),
            processed_files: self.processed.load(Ordering::Relaxed),
            skipped_files: self.skipped.load(Ordering::Relaxed),
            failed_files: self.failed.load(Ordering::Relaxed),
            by_category: FileType::ALL
                .iter()
                .map(|t| (*t, self.by_category[t.index()].load(Ordering::Relaxed)))
                .filter(|(_, count)| *count > 0)
                .collect(),
        }
    }
}

/// Point-in-time copy of [`ProcessingStats`], the run report body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_files: u64,
    pub processed_files: u64,
    pub skipped_files: u64,
    pub failed_files: u64,
    pub by_category: BTreeMap<FileType, u64>,
}

/// Result of the write-output stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Destination already held identical bytes
    Unchanged,
}

/// Mutable state threaded through the stages for one file
#[derive(Debug)]
pub struct ProcessingContext {
    pub task: Arc<TaskConfig>,
    pub source: Arc<OpenListConfig>,
    pub current_file: RemoteFile,
    /// Path below the task's remote root
    pub relative_path: String,
    /// Entries of the directory holding `current_file`
    pub siblings: Arc<Vec<RemoteFile>>,

    // Inter-stage data
    pub file_type: Option<FileType>,
    /// For subtitles and NFOs: the video they accompany
    pub companion_of: Option<RemoteFile>,
    pub resolution: Option<NameResolution>,
    pub save_directory: Option<PathBuf>,
    /// Output name without extension
    pub base_file_name: Option<String>,
    /// Output extension (`strm` for videos, the original one for companions)
    pub output_extension: Option<String>,
    pub write_outcome: Option<WriteOutcome>,
    /// Place in the run's output claim order
    pub ticket: Option<ClaimTicket>,

    state: ProcessingState,
    stats: Arc<ProcessingStats>,
}

impl ProcessingContext {
    pub fn new(
        task: Arc<TaskConfig>,
        source: Arc<OpenListConfig>,
        current_file: RemoteFile,
        siblings: Arc<Vec<RemoteFile>>,
        stats: Arc<ProcessingStats>,
    ) -> Self {
        let relative_path =
            crate::services::openlist::relative_to(&task.remote_path, &current_file.path)
                .to_string();
        Self {
            task,
            source,
            current_file,
            relative_path,
            siblings,
            file_type: None,
            companion_of: None,
            resolution: None,
            save_directory: None,
            base_file_name: None,
            output_extension: None,
            write_outcome: None,
            ticket: None,
            state: ProcessingState::Initialized,
            stats,
        }
    }

    pub fn with_ticket(mut self, ticket: ClaimTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    pub fn transition(&mut self, next: ProcessingState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::State(format!(
                "invalid transition {:?} -> {:?} for {}",
                self.state, next, self.current_file.path
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Final output path, once the naming stages have run
    pub fn output_path(&self) -> Option<PathBuf> {
        let dir = self.save_directory.as_ref()?;
        let base = self.base_file_name.as_ref()?;
        let ext = self.output_extension.as_ref()?;
        Some(dir.join(format!("{base}.{ext}")))
    }

    /// Name of the directory holding the current file, used as an extraction hint
    pub fn parent_hint(&self) -> Option<&str> {
        let parent = self.current_file.path.rsplit_once('/')?.0;
        parent.rsplit('/').next().filter(|name| !name.is_empty())
    }
}
