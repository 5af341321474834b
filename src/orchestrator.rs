//! Scan job orchestration.
//!
//! The [`Orchestrator`] owns every [`ScanJob`]. Starting a scan creates a
//! job in `staged` and spawns one driver task for it; that task is the only
//! thing that advances the job through its phases:
//!
//! ```text
//! start_scan ──▶ staged ──(slot acquired)──▶ fingerprinting ──▶ searching ──▶ completed
//!                  │                               │                │
//!                  └────── timeout / cancel / collaborator error ───┴──────▶ failed
//! ```
//!
//! # Concurrency
//!
//! - A job table behind a `tokio::sync::Mutex` serializes every mutation.
//!   Each transition re-checks the job's current state, so a collaborator
//!   response that arrives after cancellation or timeout is discarded.
//! - At most one non-terminal job exists per asset.
//! - A semaphore caps the number of jobs past `staged`
//!   (`scan.max_concurrent_scans`).
//! - Readers observe `{state, progress}` through a `tokio::sync::watch`
//!   channel per job; values never go backwards.
//! - Matches are written to the registry before `completed` is published.
//!
//! # Timeouts and retries
//!
//! Each non-terminal state has its own deadline (`queue_timeout_ms`,
//! `fingerprint_timeout_ms`, `search_timeout_ms`). Collaborator errors
//! flagged retryable are retried up to `scan.max_retries` times with
//! exponential backoff inside the phase deadline.
//!
//! A supervisor task awaits each driver; a driver that panics leaves its
//! job `failed` with an internal reason, releasing the asset.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use content_shield_core::collab::{FingerprintService, MatchSearchService};
use content_shield_core::error::{FingerprintError, Result, SearchError, ShieldError};
use content_shield_core::job::{FailureReason, JobStatus, ScanJob, ScanState, TransitionError};
use content_shield_core::models::{
    AssetId, JobId, MatchCandidate, MediaAsset, SimilarityMatch,
};
use content_shield_core::registry::memory::InMemoryRegistry;
use content_shield_core::registry::AlertRegistry;

use crate::collaborators::create_collaborators;
use crate::config::{Config, ScanConfig};
use crate::ingest::{MediaAssetIngestor, Upload};
use crate::progress::{NoProgress, ScanEvent, ScanProgressReporter};

/// Collaborator errors that may succeed on a later attempt.
trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for FingerprintError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl Retryable for SearchError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

enum PhaseOutcome<T, E> {
    Done(std::result::Result<T, E>),
    Cancelled,
    TimedOut,
}

struct JobEntry {
    job: ScanJob,
    status_tx: watch::Sender<JobStatus>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, JobEntry>,
    active_by_asset: HashMap<AssetId, JobId>,
    latest_by_asset: HashMap<AssetId, JobId>,
}

impl JobTable {
    fn entry_mut(&mut self, job_id: JobId) -> Result<&mut JobEntry> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| ShieldError::NotFound(format!("job {}", job_id)))
    }

    fn entry(&self, job_id: JobId) -> Result<&JobEntry> {
        self.jobs
            .get(&job_id)
            .ok_or_else(|| ShieldError::NotFound(format!("job {}", job_id)))
    }
}

struct Inner {
    config: ScanConfig,
    ingestor: Arc<MediaAssetIngestor>,
    registry: Arc<dyn AlertRegistry>,
    fingerprinter: Arc<dyn FingerprintService>,
    searcher: Arc<dyn MatchSearchService>,
    reporter: Arc<dyn ScanProgressReporter>,
    slots: Arc<Semaphore>,
    table: Mutex<JobTable>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: ScanConfig,
    ingestor: Arc<MediaAssetIngestor>,
    registry: Arc<dyn AlertRegistry>,
    fingerprinter: Arc<dyn FingerprintService>,
    searcher: Arc<dyn MatchSearchService>,
    reporter: Arc<dyn ScanProgressReporter>,
}

impl OrchestratorBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn ScanProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn build(self) -> Orchestrator {
        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_scans.max(1)));
        Orchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                ingestor: self.ingestor,
                registry: self.registry,
                fingerprinter: self.fingerprinter,
                searcher: self.searcher,
                reporter: self.reporter,
                slots,
                table: Mutex::new(JobTable::default()),
            }),
        }
    }
}

/// Drives scan jobs from staged assets to results. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(
        config: ScanConfig,
        ingestor: Arc<MediaAssetIngestor>,
        registry: Arc<dyn AlertRegistry>,
        fingerprinter: Arc<dyn FingerprintService>,
        searcher: Arc<dyn MatchSearchService>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            ingestor,
            registry,
            fingerprinter,
            searcher,
            reporter: Arc::new(NoProgress),
        }
    }

    /// Builder wired from a loaded config: in-memory ingestor and registry
    /// plus the configured collaborator provider.
    pub fn from_config(config: &Config) -> anyhow::Result<OrchestratorBuilder> {
        let collaborators = create_collaborators(&config.collaborators)?;
        Ok(Self::builder(
            config.scan.clone(),
            Arc::new(MediaAssetIngestor::new(config.limits.clone())),
            Arc::new(InMemoryRegistry::new()),
            collaborators.fingerprinter,
            collaborators.searcher,
        ))
    }

    pub fn ingestor(&self) -> &Arc<MediaAssetIngestor> {
        &self.inner.ingestor
    }

    pub fn registry(&self) -> &Arc<dyn AlertRegistry> {
        &self.inner.registry
    }

    /// Validate and stage an upload.
    pub fn stage(&self, upload: Upload) -> Result<MediaAsset> {
        self.inner.ingestor.stage(upload)
    }

    /// Stage `upload` as the replacement for `previous`.
    ///
    /// The previous asset is released if it has no running job; a busy or
    /// already-cleared previous asset is left alone.
    pub async fn supersede(&self, previous: AssetId, upload: Upload) -> Result<MediaAsset> {
        let asset = self.inner.ingestor.stage(upload)?;
        match self.clear_asset(previous).await {
            Ok(_) => debug!(previous = %previous, replacement = %asset.id, "asset superseded"),
            Err(ShieldError::AssetBusy(_)) => {
                info!(previous = %previous, "previous asset still scanning, kept")
            }
            Err(ShieldError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(asset)
    }

    /// Discard a staged asset. Fails with `AssetBusy` while a scan is running on it.
    pub async fn clear_asset(&self, asset_id: AssetId) -> Result<MediaAsset> {
        let table = self.inner.table.lock().await;
        self.inner
            .ingestor
            .clear_if_idle(asset_id, |id| table.active_by_asset.contains_key(&id))
    }

    /// Create a job for `asset_id` and start driving it.
    ///
    /// Fails with `Conflict` if the asset already has a non-terminal job.
    pub async fn start_scan(&self, asset_id: AssetId) -> Result<JobStatus> {
        let (status, asset, cancel) = {
            let mut table = self.inner.table.lock().await;
            let asset = self
                .inner
                .ingestor
                .get(asset_id)?
                .ok_or_else(|| ShieldError::NotFound(format!("asset {}", asset_id)))?;
            if let Some(active) = table.active_by_asset.get(&asset_id) {
                return Err(ShieldError::Conflict(format!(
                    "asset {} already has scan {} in progress",
                    asset_id, active
                )));
            }

            let job = ScanJob::new(&asset, Utc::now());
            let job_id = job.id;
            let status = job.status();
            let (status_tx, _) = watch::channel(status.clone());
            let cancel = CancellationToken::new();
            self.inner.report_transition(&job);
            info!(job_id = %job_id, asset_id = %asset_id, name = %asset.name, "scan staged");

            table.jobs.insert(
                job_id,
                JobEntry {
                    job,
                    status_tx,
                    cancel: cancel.clone(),
                },
            );
            table.active_by_asset.insert(asset_id, job_id);
            table.latest_by_asset.insert(asset_id, job_id);
            (status, asset, cancel)
        };

        let driver = tokio::spawn(drive(self.inner.clone(), status.job_id, asset, cancel));
        tokio::spawn(supervise(self.inner.clone(), status.job_id, driver));
        Ok(status)
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatus> {
        Ok(self.inner.table.lock().await.entry(job_id)?.job.status())
    }

    /// Full job record, including timestamps and attempt count.
    pub async fn job(&self, job_id: JobId) -> Result<ScanJob> {
        Ok(self.inner.table.lock().await.entry(job_id)?.job.clone())
    }

    /// All retained jobs, most recently started first.
    pub async fn jobs(&self) -> Vec<ScanJob> {
        let table = self.inner.table.lock().await;
        let mut jobs: Vec<ScanJob> = table.jobs.values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Read-only subscription to a job's `{state, progress}`.
    pub async fn subscribe(&self, job_id: JobId) -> Result<watch::Receiver<JobStatus>> {
        Ok(self
            .inner
            .table
            .lock()
            .await
            .entry(job_id)?
            .status_tx
            .subscribe())
    }

    /// State of the latest job for an asset, or `idle` if it was never scanned.
    pub async fn asset_state(&self, asset_id: AssetId) -> Result<ScanState> {
        let table = self.inner.table.lock().await;
        if let Some(job_id) = table.latest_by_asset.get(&asset_id) {
            if let Some(entry) = table.jobs.get(job_id) {
                return Ok(entry.job.state());
            }
        }
        if self.inner.ingestor.get(asset_id)?.is_some() {
            Ok(ScanState::Idle)
        } else {
            Err(ShieldError::NotFound(format!("asset {}", asset_id)))
        }
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, job_id: JobId) -> Result<JobStatus> {
        let mut rx = self.subscribe(job_id).await?;
        let status = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| ShieldError::NotFound(format!("job {} was cleared", job_id)))?
            .clone();
        Ok(status)
    }

    /// Cancel a running job. It fails immediately with reason `cancelled`;
    /// the in-flight collaborator call is abandoned.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobStatus> {
        let mut table = self.inner.table.lock().await;
        let entry = table.entry_mut(job_id)?;
        if let Err(e) = entry.job.fail(FailureReason::Cancelled, Utc::now()) {
            return Err(ShieldError::Conflict(format!(
                "job {} is already {}",
                job_id, e.from
            )));
        }
        entry.cancel.cancel();
        let status = entry.job.status();
        entry.status_tx.send_replace(status.clone());
        self.inner.report_transition(&entry.job);
        let asset_id = entry.job.asset_id;
        table.active_by_asset.remove(&asset_id);
        info!(job_id = %job_id, progress = status.progress, "scan cancelled");
        Ok(status)
    }

    /// Remove a terminal job and its result set.
    pub async fn clear_job(&self, job_id: JobId) -> Result<usize> {
        let mut table = self.inner.table.lock().await;
        let entry = table.entry(job_id)?;
        if !entry.job.is_terminal() {
            return Err(ShieldError::Conflict(format!(
                "job {} is still {}",
                job_id,
                entry.job.state()
            )));
        }
        let asset_id = entry.job.asset_id;
        table.jobs.remove(&job_id);
        if table.latest_by_asset.get(&asset_id) == Some(&job_id) {
            table.latest_by_asset.remove(&asset_id);
        }
        let dropped = self.inner.registry.clear_job(job_id).await?;
        info!(job_id = %job_id, matches = dropped, "job cleared");
        Ok(dropped)
    }

    /// Start a scan and wait for it to finish.
    pub async fn scan_and_wait(&self, asset_id: AssetId) -> Result<JobStatus> {
        let started = self.start_scan(asset_id).await?;
        self.wait(started.job_id).await
    }
}

impl Inner {
    fn report_transition(&self, job: &ScanJob) {
        self.reporter.report(&ScanEvent::Transition {
            job_id: job.id,
            asset_name: job.asset_name.clone(),
            state: job.state(),
            progress: job.progress(),
            failure: job.failure().cloned(),
        });
    }

    /// Apply a state change under the table lock and publish it.
    async fn transition(
        &self,
        job_id: JobId,
        change: impl FnOnce(&mut ScanJob) -> std::result::Result<(), TransitionError>,
    ) -> Result<()> {
        let mut table = self.table.lock().await;
        let entry = table.entry_mut(job_id)?;
        change(&mut entry.job)?;
        entry.status_tx.send_replace(entry.job.status());
        self.report_transition(&entry.job);
        info!(
            job_id = %job_id,
            state = %entry.job.state(),
            progress = entry.job.progress(),
            "scan transition"
        );
        if entry.job.is_terminal() {
            let asset_id = entry.job.asset_id;
            table.active_by_asset.remove(&asset_id);
        }
        Ok(())
    }

    async fn fail(&self, job_id: JobId, reason: FailureReason) {
        let shown = reason.to_string();
        match self
            .transition(job_id, |job| job.fail(reason, Utc::now()))
            .await
        {
            Ok(()) => warn!(job_id = %job_id, reason = %shown, "scan failed"),
            Err(e) => debug!(job_id = %job_id, error = %e, "failure discarded"),
        }
    }

    async fn tick(&self, job_id: JobId) {
        let mut table = self.table.lock().await;
        let Ok(entry) = table.entry_mut(job_id) else {
            return;
        };
        if entry.job.tick(self.config.tick_step) {
            let status = entry.job.status();
            debug!(job_id = %job_id, progress = status.progress, "scan tick");
            self.reporter.report(&ScanEvent::Progress {
                job_id,
                asset_name: entry.job.asset_name.clone(),
                state: status.state,
                progress: status.progress,
            });
            entry.status_tx.send_replace(status);
        }
    }

    async fn record_attempt(&self, job_id: JobId) {
        if let Ok(entry) = self.table.lock().await.entry_mut(job_id) {
            entry.job.record_attempt();
        }
    }

    /// Materialize matches and complete the job, unless it already ended.
    async fn finish(&self, job_id: JobId, asset: &MediaAsset, candidates: Vec<MatchCandidate>) {
        let mut table = self.table.lock().await;
        let Ok(entry) = table.entry_mut(job_id) else {
            debug!(job_id = %job_id, "results for cleared job discarded");
            return;
        };
        if entry.job.state() != ScanState::Searching {
            debug!(
                job_id = %job_id,
                state = %entry.job.state(),
                "late search results discarded"
            );
            return;
        }

        let detected_at = Utc::now();
        let matches: Vec<SimilarityMatch> = candidates
            .into_iter()
            .map(|c| SimilarityMatch::from_candidate(job_id, asset.id, asset.kind, c, detected_at))
            .collect();
        let count = matches.len();

        let outcome = match self.registry.record_results(job_id, matches).await {
            Ok(()) => entry.job.complete(Utc::now()),
            Err(e) => entry
                .job
                .fail(FailureReason::Internal(e.to_string()), Utc::now()),
        };
        if let Err(e) = outcome {
            debug!(job_id = %job_id, error = %e, "completion discarded");
            return;
        }

        entry.status_tx.send_replace(entry.job.status());
        self.report_transition(&entry.job);
        info!(
            job_id = %job_id,
            state = %entry.job.state(),
            matches = count,
            "scan finished"
        );
        table.active_by_asset.remove(&asset.id);
    }

    /// Await one collaborator phase with ticks, retries, cancellation, and a deadline.
    async fn run_phase<T, E, F, Fut>(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
        limit: Duration,
        mut call: F,
    ) -> PhaseOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Retryable + Display,
    {
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately.
        ticker.tick().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.record_attempt(job_id).await;
            let pending = call();
            tokio::pin!(pending);

            let result = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return PhaseOutcome::Cancelled,
                    _ = &mut deadline => return PhaseOutcome::TimedOut,
                    res = &mut pending => break res,
                    _ = ticker.tick() => self.tick(job_id).await,
                }
            };

            match result {
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        job_id = %job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "collaborator call failed, retrying"
                    );
                    let backoff = tokio::time::sleep(delay);
                    tokio::pin!(backoff);
                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return PhaseOutcome::Cancelled,
                            _ = &mut deadline => return PhaseOutcome::TimedOut,
                            _ = &mut backoff => break,
                            _ = ticker.tick() => self.tick(job_id).await,
                        }
                    }
                }
                other => return PhaseOutcome::Done(other),
            }
        }
    }
}

/// Fails the job if its driver task dies without reaching a terminal state.
async fn supervise(inner: Arc<Inner>, job_id: JobId, driver: JoinHandle<()>) {
    match driver.await {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            error!(job_id = %job_id, "scan driver panicked");
            inner
                .fail(job_id, FailureReason::Internal("scan driver panicked".to_string()))
                .await;
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "scan driver stopped");
            inner
                .fail(job_id, FailureReason::Internal("scan driver stopped".to_string()))
                .await;
        }
    }
}

/// Driver task: the single owner that advances one job.
async fn drive(inner: Arc<Inner>, job_id: JobId, asset: MediaAsset, cancel: CancellationToken) {
    let acquired = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        acquired = tokio::time::timeout(
            inner.config.queue_timeout(),
            inner.slots.clone().acquire_owned(),
        ) => acquired,
    };
    let _permit = match acquired {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            inner
                .fail(job_id, FailureReason::Internal("scan slots closed".to_string()))
                .await;
            return;
        }
        Err(_) => {
            inner.fail(job_id, FailureReason::Timeout).await;
            return;
        }
    };

    if let Err(e) = inner
        .transition(job_id, ScanJob::begin_fingerprinting)
        .await
    {
        debug!(job_id = %job_id, error = %e, "job ended before fingerprinting");
        return;
    }

    let fingerprinter = inner.fingerprinter.clone();
    let fingerprint = match inner
        .run_phase(job_id, &cancel, inner.config.fingerprint_timeout(), || {
            fingerprinter.compute_fingerprint(&asset)
        })
        .await
    {
        PhaseOutcome::Done(Ok(fp)) => fp,
        PhaseOutcome::Done(Err(e)) => {
            inner
                .fail(job_id, FailureReason::Fingerprint(e.message))
                .await;
            return;
        }
        PhaseOutcome::TimedOut => {
            inner.fail(job_id, FailureReason::Timeout).await;
            return;
        }
        PhaseOutcome::Cancelled => return,
    };
    debug!(
        job_id = %job_id,
        service = fingerprinter.name(),
        algorithm = %fingerprint.algorithm,
        "fingerprint computed"
    );

    if let Err(e) = inner.transition(job_id, ScanJob::begin_searching).await {
        debug!(job_id = %job_id, error = %e, "job ended before searching");
        return;
    }

    let searcher = inner.searcher.clone();
    let candidates = match inner
        .run_phase(job_id, &cancel, inner.config.search_timeout(), || {
            searcher.search(&asset, &fingerprint)
        })
        .await
    {
        PhaseOutcome::Done(Ok(candidates)) => candidates,
        PhaseOutcome::Done(Err(e)) => {
            inner.fail(job_id, FailureReason::Search(e.message)).await;
            return;
        }
        PhaseOutcome::TimedOut => {
            inner.fail(job_id, FailureReason::Timeout).await;
            return;
        }
        PhaseOutcome::Cancelled => return,
    };

    inner.finish(job_id, &asset, candidates).await;
}
