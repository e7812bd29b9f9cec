//! Run reports

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::StatsSnapshot;
use crate::services::refresh::RefreshReport;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RunOutcome {
    Completed,
    /// Finished with per-file failures. Still a normal, reportable outcome.
    CompletedWithFailures { failed: u64 },
    /// Whole-run failure (listing or output root). `lastExecTime` untouched.
    Aborted { reason: String },
    Cancelled,
}

impl RunOutcome {
    /// Whether the run got through the whole tree
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithFailures { .. })
    }
}

/// Final report of one run. Producible for every run, aborted ones included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub task_id: String,
    pub run_id: Uuid,
    /// Epoch millis
    pub started_at: i64,
    /// Epoch millis
    pub finished_at: i64,
    pub outcome: RunOutcome,
    pub stats: StatsSnapshot,
    pub refresh: RefreshReport,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let status = match &self.outcome {
            RunOutcome::Completed => "complete".to_string(),
            RunOutcome::CompletedWithFailures { failed } => {
                format!("complete with {failed} failures")
            }
            RunOutcome::Aborted { reason } => format!("aborted: {reason}"),
            RunOutcome::Cancelled => "cancelled".to_string(),
        };
        format!(
            "{}: {} ({} files, {} processed, {} skipped, {} failed, {}ms)",
            self.task_id,
            status,
            self.stats.total_files,
            self.stats.processed_files,
            self.stats.skipped_files,
            self.stats.failed_files,
            self.finished_at - self.started_at
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(RunOutcome::CompletedWithFailures { failed: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "completedWithFailures", "failed": 2}));
        assert!(RunOutcome::Completed.is_complete());
        assert!(!RunOutcome::Cancelled.is_complete());
    }
}
