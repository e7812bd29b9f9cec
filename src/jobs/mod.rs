//! Sync runs and their scheduling

pub mod runner;
pub mod sync_task;

pub use runner::{RunSettings, TaskRunner};
pub use sync_task::{SyncJob, run_task};

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::pipeline::RunOutcome;

/// Register every active task that has a cron expression and start the
/// scheduler. A firing that finds its task still running is dropped.
pub async fn start_scheduler(runner: Arc<TaskRunner>) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let mut scheduled = 0usize;

    for task in runner.tasks() {
        if !task.is_active {
            debug!(task_id = %task.id, "Task inactive, not scheduling");
            continue;
        }
        let Some(cron) = task.cron.as_deref() else {
            debug!(task_id = %task.id, "Task has no cron expression, on-demand only");
            continue;
        };

        let job_runner = runner.clone();
        let task_id = task.id.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let runner = job_runner.clone();
            let task_id = task_id.clone();
            Box::pin(async move {
                match runner.trigger(&task_id).await {
                    Ok(report) => {
                        if let RunOutcome::Aborted { reason } = &report.outcome {
                            error!(task_id = %task_id, reason = %reason, "Scheduled sync aborted");
                        }
                    }
                    Err(SyncError::AlreadyRunning(_)) => {
                        warn!(task_id = %task_id, "Previous run still in progress, skipping this firing");
                    }
                    Err(e) => error!(task_id = %task_id, error = %e, "Scheduled sync failed"),
                }
            })
        });

        match job {
            Ok(job) => {
                scheduler.add(job).await?;
                scheduled += 1;
                info!(task_id = %task.id, cron = cron, "Scheduled sync task");
            }
            Err(e) => error!(task_id = %task.id, cron = cron, error = %e, "Invalid cron expression"),
        }
    }

    scheduler.start().await?;

    info!(tasks = scheduled, "Job scheduler started");
    Ok(scheduler)
}
