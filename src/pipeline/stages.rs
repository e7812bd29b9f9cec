//! Pipeline stages
//!
//! classify -> check-eligibility -> resolve-name -> compute-output-path ->
//! write-output -> record-stat. Each stage returns a [`StageOutcome`]; the
//! first `Skip` or `Fail` ends processing for that file only.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OnceCell, watch};
use tracing::debug;

use super::context::{ProcessingContext, WriteOutcome};
use super::output::{safe_join, write_atomic};
use crate::error::SyncError;
use crate::services::extraction::MediaKind;
use crate::services::file_classifier::{self, FileType};
use crate::services::incremental::IncrementalTracker;
use crate::services::name_resolver::{NameResolution, NameResolver, canonical_name};
use crate::services::openlist::{RemoteFile, RemoteSource};
use crate::services::rate_limiter::{RetryConfig, retry_async};

/// What a stage decided for the current file
#[derive(Debug)]
pub enum StageOutcome {
    Continue,
    Skip(String),
    Fail(SyncError),
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut ProcessingContext) -> StageOutcome;
}

// =========================================================================
// classify
// =========================================================================

pub struct ClassifyStage;

#[async_trait]
impl Stage for ClassifyStage {
    fn name(&self) -> &'static str {
        "classify"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> StageOutcome {
        let file_type = file_classifier::classify(&ctx.current_file.name);
        ctx.stats().record_category(file_type);
        ctx.file_type = Some(file_type);
        StageOutcome::Continue
    }
}

// =========================================================================
// check-eligibility
// =========================================================================

pub struct EligibilityStage {
    tracker: IncrementalTracker,
}

impl EligibilityStage {
    pub fn new(tracker: IncrementalTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Stage for EligibilityStage {
    fn name(&self) -> &'static str {
        "check-eligibility"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> StageOutcome {
        match ctx.file_type {
            Some(FileType::Video) => {}
            Some(file_type) if file_type.is_companion() => {
                match file_classifier::find_companion_video(&ctx.current_file.name, &ctx.siblings)
                {
                    Some(video) => ctx.companion_of = Some(video.clone()),
                    None => return StageOutcome::Skip(format!("{file_type} without matching video")),
                }
            }
            Some(file_type) => return StageOutcome::Skip(format!("{file_type} files are not synced")),
            None => return StageOutcome::Fail(SyncError::State("file was not classified".into())),
        }

        if self.tracker.is_unchanged(&ctx.current_file) {
            return StageOutcome::Skip("unchanged since last run".into());
        }
        StageOutcome::Continue
    }
}

// =========================================================================
// resolve-name
// =========================================================================

/// Run-scoped memo of video name resolutions. A video and its companions
/// share one extraction call, whichever of them gets there first.
#[derive(Default)]
pub struct NameCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<NameResolution>>>>,
}

impl NameCache {
    pub async fn resolve(
        &self,
        resolver: &NameResolver,
        video: &RemoteFile,
        parent_hint: Option<&str>,
    ) -> NameResolution {
        let cell = self
            .entries
            .lock()
            .entry(video.path.clone())
            .or_default()
            .clone();
        cell.get_or_init(|| resolver.resolve(&video.name, parent_hint))
            .await
            .clone()
    }
}

/// Run-scoped registry of output paths.
///
/// Files take a [`ClaimTicket`] in walk order. Claims are settled strictly
/// in ticket order, so when several remote files map to the same output the
/// earliest one in the walk owns it, however the workers are scheduled.
#[derive(Debug)]
pub struct OutputClaims {
    next_ticket: AtomicU64,
    /// Lowest ticket that has not settled yet
    turn: watch::Sender<u64>,
    settled: Mutex<BTreeSet<u64>>,
    /// Output path -> remote path of the video that owns it
    owners: Mutex<HashMap<PathBuf, String>>,
}

impl Default for OutputClaims {
    fn default() -> Self {
        let (turn, _) = watch::channel(0);
        Self {
            next_ticket: AtomicU64::new(0),
            turn,
            settled: Mutex::new(BTreeSet::new()),
            owners: Mutex::new(HashMap::new()),
        }
    }
}

impl OutputClaims {
    /// Issue the next ticket. Must be called in walk order.
    pub fn ticket(self: &Arc<Self>) -> ClaimTicket {
        ClaimTicket {
            seq: self.next_ticket.fetch_add(1, Ordering::SeqCst),
            claims: self.clone(),
            settled: false,
        }
    }

    fn take(&self, paths: &[PathBuf], owner: &str) -> Result<(), String> {
        let mut owners = self.owners.lock();
        if let Some(holder) = paths
            .iter()
            .filter_map(|path| owners.get(path))
            .find(|holder| holder.as_str() != owner)
        {
            return Err(holder.clone());
        }
        for path in paths {
            owners
                .entry(path.clone())
                .or_insert_with(|| owner.to_string());
        }
        Ok(())
    }

    fn settle(&self, seq: u64) {
        let mut settled = self.settled.lock();
        settled.insert(seq);
        let mut turn = *self.turn.borrow();
        while settled.remove(&turn) {
            turn += 1;
        }
        self.turn.send_replace(turn);
    }
}

/// A file's place in the claim order. Settles on drop, so files that stop
/// early never hold up the ones behind them.
#[derive(Debug)]
pub struct ClaimTicket {
    seq: u64,
    claims: Arc<OutputClaims>,
    settled: bool,
}

impl ClaimTicket {
    /// Wait for every earlier ticket to settle, then claim `paths` for
    /// `owner`. Returns the current holder when another owner got there first.
    pub async fn claim(&mut self, paths: &[PathBuf], owner: &str) -> Result<(), String> {
        let seq = self.seq;
        let mut turn = self.claims.turn.subscribe();
        // The sender lives in `self.claims`, so the channel cannot close
        let _ = turn.wait_for(|next| *next >= seq).await;
        let result = self.claims.take(paths, owner);
        self.settle();
        result
    }

    fn settle(&mut self) {
        if !self.settled {
            self.settled = true;
            self.claims.settle(self.seq);
        }
    }
}

impl Drop for ClaimTicket {
    fn drop(&mut self) {
        self.settle();
    }
}

pub struct ResolveNameStage {
    resolver: Arc<NameResolver>,
    cache: Arc<NameCache>,
}

impl ResolveNameStage {
    pub fn new(resolver: Arc<NameResolver>, cache: Arc<NameCache>) -> Self {
        Self { resolver, cache }
    }
}

#[async_trait]
impl Stage for ResolveNameStage {
    fn name(&self) -> &'static str {
        "resolve-name"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> StageOutcome {
        let video = ctx
            .companion_of
            .clone()
            .unwrap_or_else(|| ctx.current_file.clone());
        let resolution = self
            .cache
            .resolve(&self.resolver, &video, ctx.parent_hint())
            .await;

        if resolution.missing_episode() {
            return StageOutcome::Skip("tv metadata without season/episode".into());
        }

        let (base_name, extension) = match &ctx.companion_of {
            Some(video) => {
                let suffix =
                    file_classifier::companion_suffix(&ctx.current_file.name, &video.name)
                        .unwrap_or_default();
                let extension = ctx
                    .current_file
                    .name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_string())
                    .unwrap_or_default();
                (format!("{}{}", resolution.base_name, suffix), extension)
            }
            None => (resolution.base_name.clone(), "strm".to_string()),
        };

        if base_name.is_empty() || extension.is_empty() {
            return StageOutcome::Fail(SyncError::State(format!(
                "empty output name for {}",
                ctx.current_file.path
            )));
        }

        ctx.base_file_name = Some(base_name);
        ctx.output_extension = Some(extension);
        ctx.resolution = Some(resolution);
        StageOutcome::Continue
    }
}

// =========================================================================
// compute-output-path
// =========================================================================

pub struct OutputPathStage {
    local_root: PathBuf,
}

impl OutputPathStage {
    pub fn new(local_root: PathBuf) -> Self {
        Self { local_root }
    }
}

#[async_trait]
impl Stage for OutputPathStage {
    fn name(&self) -> &'static str {
        "compute-output-path"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> StageOutcome {
        let Some(resolution) = ctx.resolution.as_ref() else {
            return StageOutcome::Fail(SyncError::State("name was not resolved".into()));
        };

        let video_base_name = resolution.base_name.clone();

        let directory = match resolution.scraped() {
            Some(extraction) if extraction.kind == MediaKind::Tv => {
                let show = sanitize_filename::sanitize(extraction.title.as_deref().unwrap_or_default());
                let season = extraction.season.unwrap_or_default();
                Some(self.local_root.join(show).join(format!("Season {season:02}")))
            }
            Some(extraction) => {
                canonical_name(extraction).map(|folder| self.local_root.join(folder))
            }
            None => {
                let relative_dir = ctx
                    .relative_path
                    .rsplit_once('/')
                    .map(|(dir, _)| dir)
                    .unwrap_or("");
                safe_join(&self.local_root, relative_dir)
            }
        };

        let Some(directory) = directory else {
            return StageOutcome::Fail(SyncError::State(format!(
                "unsafe output location for {}",
                ctx.current_file.path
            )));
        };
        ctx.save_directory = Some(directory.clone());
        let Some(output) = ctx.output_path() else {
            return StageOutcome::Fail(SyncError::State("output name was not resolved".into()));
        };

        // Outputs belong to a video; a companion also claims its video's pointer
        let (owner, paths) = match &ctx.companion_of {
            Some(video) => (
                video.path.clone(),
                vec![directory.join(format!("{video_base_name}.strm")), output],
            ),
            None => (ctx.current_file.path.clone(), vec![output]),
        };
        let Some(ticket) = ctx.ticket.as_mut() else {
            return StageOutcome::Fail(SyncError::State("file has no claim ticket".into()));
        };
        match ticket.claim(&paths, &owner).await {
            Ok(()) => StageOutcome::Continue,
            Err(holder) => StageOutcome::Skip(format!("output already taken by {holder}")),
        }
    }
}

// =========================================================================
// write-output
// =========================================================================

pub struct WriteOutputStage {
    source: Arc<dyn RemoteSource>,
    retry: RetryConfig,
}

impl WriteOutputStage {
    pub fn new(source: Arc<dyn RemoteSource>, retry: RetryConfig) -> Self {
        Self { source, retry }
    }

    /// Download a companion unless an output of the same size already exists
    async fn companion_content(
        &self,
        file: &RemoteFile,
        path: &std::path::Path,
    ) -> Result<Option<Vec<u8>>, SyncError> {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.len() == file.size {
                return Ok(None);
            }
        }
        let content =
            retry_async(|| self.source.fetch(file), &self.retry, "openlist.fetch").await?;
        Ok(Some(content))
    }
}

#[async_trait]
impl Stage for WriteOutputStage {
    fn name(&self) -> &'static str {
        "write-output"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> StageOutcome {
        let Some(path) = ctx.output_path() else {
            return StageOutcome::Fail(SyncError::State("output path was not computed".into()));
        };

        let content = if ctx.companion_of.is_some() {
            match self.companion_content(&ctx.current_file, &path).await {
                Ok(Some(content)) => content,
                Ok(None) => {
                    ctx.write_outcome = Some(WriteOutcome::Unchanged);
                    return StageOutcome::Continue;
                }
                Err(e) => return StageOutcome::Fail(e),
            }
        } else {
            if ctx.current_file.raw_url.is_empty() {
                return StageOutcome::Fail(SyncError::RemoteUnavailable(format!(
                    "no direct-access URL for {}",
                    ctx.current_file.path
                )));
            }
            ctx.current_file.raw_url.clone().into_bytes()
        };

        match write_atomic(&path, &content).await {
            Ok(outcome) => {
                debug!(path = %path.display(), outcome = ?outcome, "Wrote output file");
                ctx.write_outcome = Some(outcome);
                StageOutcome::Continue
            }
            Err(e) => StageOutcome::Fail(SyncError::write(path, e)),
        }
    }
}

// =========================================================================
// record-stat
// =========================================================================

pub struct RecordStatStage;

#[async_trait]
impl Stage for RecordStatStage {
    fn name(&self) -> &'static str {
        "record-stat"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> StageOutcome {
        ctx.stats().record_processed();
        StageOutcome::Continue
    }
}
