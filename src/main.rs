//! strm-sync - OpenList to `.strm` library synchronizer
//!
//! Runs every scheduled task on its cron expression, or a single task once
//! with `--run <task>`.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strm_sync::config::{Config, ExtractorKind, TaskFile};
use strm_sync::jobs::{self, RunSettings, TaskRunner};
use strm_sync::pipeline::RunOutcome;
use strm_sync::services::{
    EmbyClient, JsonStateStore, NameExtractor, OllamaConfig, OllamaExtractor, OpenListClient,
    RetryConfig, RuleExtractor,
};

use crate::cli::CliOptions;

/// How long in-flight runs get to persist their state after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = CliOptions::from_args();
    let mut config = Config::from_env()?;
    if let Some(path) = options.tasks_file.clone() {
        config.tasks_file = path;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "strm_sync=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting strm-sync");

    let task_file = TaskFile::load(&config.tasks_file)?;
    tracing::info!(
        path = %config.tasks_file.display(),
        sources = task_file.openlist.len(),
        tasks = task_file.tasks.len(),
        "Task file loaded"
    );

    let runner = Arc::new(build_runner(&config, task_file)?);

    if let Some(task_id) = options.run_task {
        let report = runner.trigger(&task_id).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if let RunOutcome::Aborted { reason } = &report.outcome {
            anyhow::bail!("run of {task_id} aborted: {reason}");
        }
        return Ok(());
    }

    let mut scheduler = jobs::start_scheduler(runner.clone()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    scheduler.shutdown().await?;
    if !runner.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Sync runs still in flight at exit, their state was not saved"
        );
    }

    Ok(())
}

/// Wire the configured sources, media servers and extractor into a runner
fn build_runner(config: &Config, task_file: TaskFile) -> anyhow::Result<TaskRunner> {
    let store = Arc::new(JsonStateStore::new(config.state_file.clone()));
    let settings = RunSettings {
        workers: config.workers,
        retry: RetryConfig {
            max_attempts: config.retry_max_attempts.max(1),
            initial_interval: config.retry_initial_interval,
            ..RetryConfig::default()
        },
        extraction_timeout: config.extraction_timeout,
    };

    let mut runner = TaskRunner::new(task_file.tasks.clone(), store).with_settings(settings);

    for source in &task_file.openlist {
        let client = OpenListClient::new(source.clone(), config.http_timeout)
            .with_context(|| format!("OpenList source {}", source.id))?;
        runner = runner.with_source(source.clone(), Arc::new(client));
    }

    for task in &task_file.tasks {
        if let Some(emby) = &task.emby {
            let client = EmbyClient::new(emby, config.http_timeout)
                .with_context(|| format!("Emby server for task {}", task.id))?;
            runner = runner.with_media_server(&task.id, Arc::new(client));
        }
    }

    if task_file.tasks.iter().any(|task| task.need_scrap) {
        let extractor: Arc<dyn NameExtractor> = match config.extractor {
            ExtractorKind::Rules => Arc::new(RuleExtractor),
            ExtractorKind::Ollama => Arc::new(OllamaExtractor::new(OllamaConfig {
                url: config.ollama_url.clone(),
                model: config.ollama_model.clone(),
                timeout_seconds: config.extraction_timeout.as_secs().max(1),
                ..OllamaConfig::default()
            })?),
        };
        tracing::info!(extractor = extractor.name(), "Name extraction enabled");
        runner = runner.with_extractor(extractor);
    }

    Ok(runner)
}
