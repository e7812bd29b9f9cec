//! One synchronization run of one task

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::runner::RunSettings;
use crate::config::{OpenListConfig, TaskConfig};
use crate::error::SyncError;
use crate::pipeline::{
    Pipeline, PipelineEnv, ProcessingContext, ProcessingStats, RunOutcome, RunReport,
};
use crate::services::extraction::NameExtractor;
use crate::services::incremental::{IncrementalTracker, TaskState, TaskStateStore, advance};
use crate::services::name_resolver::{NameResolver, RenameRule};
use crate::services::openlist::{RemoteFile, RemoteSource, walk};
use crate::services::refresh::{MediaServer, RefreshNotifier};

/// Everything one run needs, resolved by the runner
pub struct SyncJob {
    pub task: Arc<TaskConfig>,
    pub source_config: Arc<OpenListConfig>,
    pub source: Arc<dyn RemoteSource>,
    pub media_server: Option<Arc<dyn MediaServer>>,
    pub extractor: Option<Arc<dyn NameExtractor>>,
    pub store: Arc<dyn TaskStateStore>,
    pub settings: RunSettings,
}

struct RunPlan {
    pipeline: Pipeline,
    persisted: TaskState,
    previous_exec_time: i64,
}

impl SyncJob {
    /// Load state and build the pipeline. Any error here aborts the run
    /// before a single file is touched.
    async fn prepare(&self) -> Result<RunPlan, SyncError> {
        let persisted = self.store.load(&self.task.id).await?;
        let previous_exec_time = persisted.last_exec_time.max(self.task.last_exec_time);

        tokio::fs::create_dir_all(&self.task.local_path)
            .await
            .map_err(|e| SyncError::write(&self.task.local_path, e))?;

        let rename = self
            .task
            .rename_rule()
            .map_err(|e| SyncError::config(e.to_string()))?
            .map(|(regex, replacement)| RenameRule::new(regex, replacement));
        let extractor = if self.task.need_scrap {
            self.extractor.clone()
        } else {
            None
        };
        if self.task.need_scrap && extractor.is_none() {
            warn!(task_id = %self.task.id, "Scraping requested but no extractor configured");
        }

        let resolver = Arc::new(NameResolver::new(
            rename,
            extractor,
            self.settings.retry.clone(),
            self.settings.extraction_timeout,
        ));
        let pipeline = Pipeline::standard(PipelineEnv {
            resolver,
            tracker: IncrementalTracker::new(self.task.is_increment, previous_exec_time),
            source: self.source.clone(),
            retry: self.settings.retry.clone(),
            local_root: self.task.local_path.clone(),
        });

        Ok(RunPlan {
            pipeline,
            persisted,
            previous_exec_time,
        })
    }

    /// Walk the remote tree and push every file through the pipeline.
    /// Returns the listing error that cut the walk short, if any.
    async fn process_tree(
        &self,
        pipeline: &Pipeline,
        stats: &Arc<ProcessingStats>,
        cancel: &CancellationToken,
    ) -> Option<SyncError> {
        let listing_error = Mutex::new(None);

        let files = walk(
            self.source.clone(),
            self.task.remote_path.clone(),
            self.settings.retry.clone(),
        )
        .take_until(cancel.cancelled())
        .map(|listing| match listing {
            Ok(listing) => {
                let siblings = Arc::new(listing.entries);
                let files: Vec<RemoteFile> =
                    siblings.iter().filter(|e| !e.is_dir).cloned().collect();
                stream::iter(files.into_iter().map(move |f| (f, siblings.clone()))).left_stream()
            }
            Err(e) => {
                *listing_error.lock() = Some(e);
                stream::empty().right_stream()
            }
        })
        .flatten();

        files
            .for_each_concurrent(self.settings.workers.max(1), |(file, siblings)| {
                // Taken here, in walk order, so colliding outputs go to the earliest file
                let ticket = pipeline.ticket();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let ctx = ProcessingContext::new(
                        self.task.clone(),
                        self.source_config.clone(),
                        file,
                        siblings,
                        stats.clone(),
                    )
                    .with_ticket(ticket);
                    pipeline.process(ctx).await;
                }
            })
            .await;

        listing_error.into_inner()
    }
}

/// Execute one run to completion and produce its report.
///
/// `lastExecTime` only advances, to this run's start time, when the whole
/// tree was processed. Aborted and cancelled runs leave it as it was.
pub async fn run_task(job: SyncJob, cancel: CancellationToken) -> RunReport {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now().timestamp_millis();
    let span = info_span!("sync_run", task_id = %job.task.id, run_id = %run_id);

    async move {
        info!(
            task = job.task.display_name(),
            remote_path = %job.task.remote_path,
            local_path = %job.task.local_path.display(),
            incremental = job.task.is_increment,
            scrape = job.task.need_scrap,
            "Starting sync run"
        );

        let stats = ProcessingStats::new();
        let mut persisted = None;
        let mut previous_exec_time = 0;

        let outcome = match job.prepare().await {
            Err(e) => RunOutcome::Aborted {
                reason: e.to_string(),
            },
            Ok(plan) => {
                persisted = Some(plan.persisted);
                previous_exec_time = plan.previous_exec_time;
                match job.process_tree(&plan.pipeline, &stats, &cancel).await {
                    Some(e) => RunOutcome::Aborted {
                        reason: e.to_string(),
                    },
                    None if cancel.is_cancelled() => RunOutcome::Cancelled,
                    None => match stats.snapshot().failed_files {
                        0 => RunOutcome::Completed,
                        failed => RunOutcome::CompletedWithFailures { failed },
                    },
                }
            }
        };

        let refresh = if outcome.is_complete() {
            RefreshNotifier::new(job.source.clone(), job.media_server.clone())
                .notify(&job.task, stats.processed())
                .await
        } else {
            RefreshNotifier::skipped(&job.task)
        };

        let report = RunReport {
            task_id: job.task.id.clone(),
            run_id,
            started_at,
            finished_at: Utc::now().timestamp_millis(),
            outcome,
            stats: stats.snapshot(),
            refresh,
        };

        // Without a readable state there is nothing safe to write back
        if let Some(persisted) = persisted {
            let last_exec_time = if report.outcome.is_complete() {
                advance(previous_exec_time, started_at)
            } else {
                persisted.last_exec_time
            };
            let state = TaskState {
                last_exec_time,
                last_report: Some(report.clone()),
            };
            if let Err(e) = job.store.save(&job.task.id, &state).await {
                error!(error = %e, "Failed to persist task state");
            }
        }

        match &report.outcome {
            RunOutcome::Aborted { reason } => error!(reason = %reason, "Sync run aborted"),
            _ => info!(summary = %report.summary(), "Sync run finished"),
        }
        report
    }
    .instrument(span)
    .await
}

