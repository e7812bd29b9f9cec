//! File-processing pipeline
//!
//! A fixed, ordered list of stages run over one [`ProcessingContext`] per
//! file. Skips and failures are contained to the file: they set its
//! terminal state, bump the shared counters and never abort the batch.

pub mod context;
pub mod output;
pub mod report;
pub mod stages;

pub use context::{
    ProcessingContext, ProcessingState, ProcessingStats, StatsSnapshot, WriteOutcome,
};
pub use report::{RunOutcome, RunReport};
pub use stages::{ClaimTicket, NameCache, OutputClaims, Stage, StageOutcome};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::services::incremental::IncrementalTracker;
use crate::services::name_resolver::NameResolver;
use crate::services::openlist::RemoteSource;
use crate::services::rate_limiter::RetryConfig;
use stages::{
    ClassifyStage, EligibilityStage, OutputPathStage, RecordStatStage, ResolveNameStage,
    WriteOutputStage,
};

/// Everything the standard stages need for one run
pub struct PipelineEnv {
    pub resolver: Arc<NameResolver>,
    pub tracker: IncrementalTracker,
    pub source: Arc<dyn RemoteSource>,
    pub retry: RetryConfig,
    pub local_root: PathBuf,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    claims: Arc<OutputClaims>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            claims: Arc::new(OutputClaims::default()),
        }
    }

    /// Reserve the next place in the claim order. Callers processing files
    /// concurrently take tickets in walk order, before spawning the work.
    pub fn ticket(&self) -> ClaimTicket {
        self.claims.ticket()
    }

    /// classify -> check-eligibility -> resolve-name -> compute-output-path ->
    /// write-output -> record-stat
    pub fn standard(env: PipelineEnv) -> Self {
        let cache = Arc::new(NameCache::default());
        Self::new(vec![
            Box::new(ClassifyStage),
            Box::new(EligibilityStage::new(env.tracker)),
            Box::new(ResolveNameStage::new(env.resolver, cache)),
            Box::new(OutputPathStage::new(env.local_root)),
            Box::new(WriteOutputStage::new(env.source, env.retry)),
            Box::new(RecordStatStage),
        ])
    }

    fn finish(ctx: &mut ProcessingContext, state: ProcessingState) {
        if let Err(e) = ctx.transition(state) {
            warn!(error = %e, "Ignoring invalid state transition");
        }
    }

    /// Run every stage over `ctx` and return the file's terminal state
    pub async fn process(&self, mut ctx: ProcessingContext) -> ProcessingState {
        if ctx.ticket.is_none() {
            ctx.ticket = Some(self.ticket());
        }
        ctx.stats().record_seen();
        Self::finish(&mut ctx, ProcessingState::Processing);

        for stage in &self.stages {
            match stage.run(&mut ctx).await {
                StageOutcome::Continue => {}
                StageOutcome::Skip(reason) => {
                    debug!(
                        path = %ctx.current_file.path,
                        stage = stage.name(),
                        reason = %reason,
                        "Skipped file"
                    );
                    ctx.stats().record_skipped();
                    Self::finish(&mut ctx, ProcessingState::Skipped);
                    return ctx.state();
                }
                StageOutcome::Fail(error) => {
                    warn!(
                        path = %ctx.current_file.path,
                        stage = stage.name(),
                        error = %error,
                        "Failed to process file"
                    );
                    ctx.stats().record_failed();
                    Self::finish(&mut ctx, ProcessingState::Failed);
                    return ctx.state();
                }
            }
        }

        debug!(
            path = %ctx.current_file.path,
            output = ?ctx.output_path(),
            outcome = ?ctx.write_outcome,
            "Processed file"
        );
        Self::finish(&mut ctx, ProcessingState::Success);
        ctx.state()
    }
}
