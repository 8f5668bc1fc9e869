//! Batch runner
//!
//! Composes the engine for one invocation: orchestrator gates, candidate
//! extraction, normalization, on-disk checks, network probes, classification
//! and persistence.

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, HttpConfig, ScanConfig, ScanMethod};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::http::{
    HttpTransport, MetricsSink, ProbeMethod, ProbeSender, ReqwestTransport, RequestArgs,
    RetryingClient, TracingMetricsSink,
};
use crate::jobs::{EventSink, JobQueue, JobScheduler, ScanJob, TracingEventSink};
use crate::orchestrator::{
    InvocationOutcome, LoadProbe, LockManager, LockPrimitive, Orchestrator, Preflight,
    ProcLoadAvg, RescheduleReason, ScanRun, Trigger,
};
use crate::proxy::{CredentialCipher, HealthStore, ProxyPool};
use crate::queue::{ContentItem, ContentRepository, NextBatch, ScanQueue};
use crate::scan::classify::{classify_outcome, FileProbe, FsProbe};
use crate::scan::extract::{extract_candidates, Candidate, CandidateKind};
use crate::soft404::Soft404Detector;
use crate::state::{LinkStatus, ScanStatus};
use crate::storage::{Finding, SqliteStorage, Storage};
use crate::url::{HostResolver, NormalizeFailure, Normalizer, OriginContext, SystemResolver};
use crate::SweepError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Collaborators the runner is built from
///
/// [`RunnerParts::sqlite`] wires everything to one database and the real
/// network, filesystem and clock; tests replace individual fields.
pub struct RunnerParts {
    pub content: Arc<dyn ContentRepository>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub locks: Arc<dyn LockPrimitive>,
    pub health: Arc<dyn HealthStore>,
    pub results: Arc<dyn Storage>,
    pub events: Arc<dyn EventSink>,
    pub transport: Arc<dyn HttpTransport>,
    pub resolver: Arc<dyn HostResolver>,
    pub load: Arc<dyn LoadProbe>,
    pub files: Arc<dyn FileProbe>,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
}

impl RunnerParts {
    pub fn sqlite(storage: Arc<SqliteStorage>, http: &HttpConfig) -> Self {
        Self {
            content: storage.clone(),
            scheduler: storage.clone(),
            locks: storage.clone(),
            health: storage.clone(),
            results: storage,
            events: Arc::new(TracingEventSink),
            transport: Arc::new(ReqwestTransport::new(Duration::from_secs(http.timeout_secs))),
            resolver: Arc::new(SystemResolver),
            load: Arc::new(ProcLoadAvg::default()),
            files: Arc::new(FsProbe),
            metrics: Arc::new(TracingMetricsSink),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Terminal state of one runner invocation
#[derive(Debug)]
pub enum RunOutcome {
    Ran(BatchReport),
    Rescheduled {
        reason: RescheduleReason,
        job: ScanJob,
        scheduled: bool,
    },
    Rejected(SweepError),
}

/// What one batch produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub job: ScanJob,
    pub items_scanned: usize,
    pub findings: Vec<Finding>,
    pub next: NextBatch,
}

impl BatchReport {
    /// Findings editors should look at
    pub fn problems(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.status.is_finding())
    }
}

/// What one pass over the job queue did
#[derive(Debug, Default)]
pub struct TickReport {
    /// True when nothing was queued and a new delta scan was started
    pub started_delta: bool,
    pub outcomes: Vec<RunOutcome>,
    /// Batches whose run failed; the remaining jobs stay queued
    pub failed: Vec<(ScanJob, SweepError)>,
}

/// A candidate waiting for its network probe
struct PendingProbe {
    candidate: Candidate,
    outcome: DispatchOutcome,
}

/// Runs scan batches end to end
pub struct BatchRunner {
    scan: ScanConfig,
    http: HttpConfig,
    orchestrator: Orchestrator,
    normalizer: Normalizer,
    detector: Soft404Detector,
    sender: Arc<dyn ProbeSender>,
    content: Arc<dyn ContentRepository>,
    results: Arc<dyn Storage>,
    files: Arc<dyn FileProbe>,
    clock: Arc<dyn Clock>,
}

impl BatchRunner {
    /// Builds a runner backed by one SQLite database
    pub fn new(config: &Config, storage: Arc<SqliteStorage>) -> Result<Self, SweepError> {
        Self::from_parts(config, RunnerParts::sqlite(storage, &config.http))
    }

    /// Builds a runner from explicit collaborators
    ///
    /// # Returns
    ///
    /// * `Ok(BatchRunner)` - Ready to run batches
    /// * `Err(SweepError)` - A site URL or soft-404 indicator is invalid
    pub fn from_parts(config: &Config, parts: RunnerParts) -> Result<Self, SweepError> {
        let clock = parts.clock;

        let mut client = RetryingClient::from_config(&config.http, parts.transport)
            .with_metrics(parts.metrics)
            .with_clock(clock.clone());

        if config.proxy.enabled {
            let cipher = (!config.site.secret.is_empty())
                .then(|| CredentialCipher::from_secret(&config.site.secret));
            let pool = ProxyPool::new(&config.proxy, cipher.as_ref(), parts.health, clock.clone());
            client = client.with_proxy_pool(Arc::new(pool));
        }

        let queue = ScanQueue::new(
            &config.scan,
            parts.content.clone(),
            parts.scheduler.clone(),
            parts.events.clone(),
            clock.clone(),
        );

        let orchestrator = Orchestrator::new(
            LockManager::new(parts.locks, clock.clone(), config.schedule.lock_timeout),
            Preflight::from_config(config),
            Arc::new(queue),
            parts.scheduler,
            parts.events,
            parts.load,
            clock.clone(),
        );

        Ok(Self {
            scan: config.scan.clone(),
            http: config.http.clone(),
            orchestrator,
            normalizer: Normalizer::from_config(&config.site, parts.resolver)?,
            detector: Soft404Detector::from_config(&config.soft404)?,
            sender: Arc::new(client),
            content: parts.content,
            results: parts.results,
            files: parts.files,
            clock,
        })
    }

    /// Runs the recurring trigger against the job queue
    ///
    /// With no scan chain queued this starts batch 0 of a delta scan.
    /// Otherwise due jobs are claimed and run one at a time. A failed batch
    /// is reported and the loop moves on; a deferred batch ends the pass
    /// since the jobs behind it would be deferred for the same reason.
    ///
    /// # Returns
    ///
    /// * `Ok(TickReport)` - Every run attempted in this pass
    /// * `Err(SweepError)` - The job queue itself could not be read
    pub async fn tick(&self, jobs: &dyn JobQueue) -> Result<TickReport, SweepError> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        if !jobs.has_pending()? {
            tracing::info!("No scan queued, starting a delta scan");
            report.started_delta = true;
            let job = ScanJob::new(0, false, now);
            match self.run(Trigger::Recurring, &job).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => report.failed.push((job, e)),
            }
            return Ok(report);
        }

        while let Some(job) = jobs.claim_next_due(now)? {
            match self.run(Trigger::Recurring, &job).await {
                Ok(outcome) => {
                    let deferred = matches!(outcome, RunOutcome::Rescheduled { .. });
                    report.outcomes.push(outcome);
                    if deferred {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Batch {} failed: {}", job.batch_index, e);
                    report.failed.push((job, e));
                }
            }
        }

        Ok(report)
    }

    /// Runs one invocation for `job`
    ///
    /// # Returns
    ///
    /// * `Ok(RunOutcome)` - The batch ran, was rescheduled, or was rejected
    /// * `Err(SweepError)` - Storage failed; the lock has been released
    pub async fn run(&self, trigger: Trigger, job: &ScanJob) -> Result<RunOutcome, SweepError> {
        let last_check = self.results.last_check()?;
        let mut status = self.results.load_status()?.unwrap_or_default();

        let run = match self.orchestrator.invoke(trigger, job, last_check)? {
            InvocationOutcome::Ran(run) => run,
            InvocationOutcome::Rescheduled {
                reason,
                job,
                scheduled,
            } => {
                status.defer(self.clock.now());
                self.results.save_status(&status)?;
                return Ok(RunOutcome::Rescheduled {
                    reason,
                    job,
                    scheduled,
                });
            }
            InvocationOutcome::Rejected(error) => return Ok(RunOutcome::Rejected(error)),
        };

        match self.process(&run, &mut status).await {
            Ok(findings) => {
                let next = self.orchestrator.finish(&run);

                if next == NextBatch::Done {
                    let checkpoint = status.started_at.unwrap_or_else(|| self.clock.now());
                    self.results.set_last_check(checkpoint)?;
                    tracing::info!("Scan complete, checkpoint saved at {}", checkpoint);
                }

                Ok(RunOutcome::Ran(BatchReport {
                    job: run.job,
                    items_scanned: run.batch.items.len(),
                    findings,
                    next,
                }))
            }
            Err(e) => {
                tracing::error!("Batch {} failed: {}", run.job.batch_index, e);
                self.orchestrator.abandon(&run);
                status.fail(e.to_string(), self.clock.now());
                if let Err(save_error) = self.results.save_status(&status) {
                    tracing::warn!("Failed to save scan status: {}", save_error);
                }
                Err(e)
            }
        }
    }

    async fn process(&self, run: &ScanRun, status: &mut ScanStatus) -> Result<Vec<Finding>, SweepError> {
        status.begin_batch(run.job.batch_index, run.job.is_full_scan, self.clock.now());
        self.results.save_status(status)?;

        let mut findings: Vec<Finding> = Vec::new();
        let pending: Arc<Mutex<Vec<PendingProbe>>> = Arc::default();
        let mut dispatcher = Dispatcher::from_config(self.sender.clone(), &self.scan, &self.http)
            .with_local_hosts(self.normalizer.local_hosts());

        for item in &run.batch.items {
            let origin = self.origin_for(item);
            let candidates =
                extract_candidates(item, self.scan.check_links, self.scan.check_images);

            tracing::debug!("Item {}: {} candidates", item.id, candidates.len());

            for candidate in candidates {
                let target = match self.normalizer.normalize(&candidate.raw_url, &origin).await {
                    Ok(normalized) => match &normalized.file_path {
                        Some(path) if self.files.exists(path) => {
                            findings.push(self.finding(
                                &candidate,
                                normalized.normalized_url.as_str(),
                                LinkStatus::Alive,
                                None,
                                None,
                            ));
                            continue;
                        }
                        Some(_) if !normalized.is_remote_upload_candidate => {
                            findings.push(self.finding(
                                &candidate,
                                normalized.normalized_url.as_str(),
                                LinkStatus::MissingFile,
                                None,
                                normalized.decoded_relative_path.clone(),
                            ));
                            continue;
                        }
                        _ => normalized.normalized_url,
                    },
                    // Same-site pages outside the upload directory are probed over HTTP
                    Err(NormalizeFailure::PathOutsideBasedir) => {
                        match self.normalizer.resolve(&candidate.raw_url, &origin) {
                            Some(url) => url,
                            None => {
                                findings.push(
                                    self.rejected(&candidate, NormalizeFailure::PathOutsideBasedir),
                                );
                                continue;
                            }
                        }
                    }
                    Err(failure) => {
                        findings.push(self.rejected(&candidate, failure));
                        continue;
                    }
                };

                let sink = pending.clone();
                dispatcher
                    .enqueue(
                        target,
                        RequestArgs::default(),
                        RequestArgs::default(),
                        self.scan.scan_method,
                        &self.scan.temporary_statuses,
                        Box::new(move |outcome: DispatchOutcome| {
                            if let Ok(mut sink) = sink.lock() {
                                sink.push(PendingProbe { candidate, outcome });
                            }
                        }),
                    )
                    .await;
            }
        }

        dispatcher.drain().await;

        let probed = pending
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default();

        for mut probe in probed {
            if self.needs_body_check(&probe) {
                probe.outcome = self.fetch_body(probe.outcome).await;
            }
            tracing::debug!("{} -> {:?}", probe.outcome.url, probe.outcome.probe_outcome());
            let verdict = classify_outcome(&probe.outcome, &self.scan.temporary_statuses, &self.detector);
            findings.push(self.finding(
                &probe.candidate,
                probe.outcome.url.as_str(),
                verdict.status,
                verdict.http_status,
                verdict.reason,
            ));
        }

        let mut by_item: BTreeMap<i64, Vec<Finding>> = run
            .batch
            .items
            .iter()
            .map(|item| (item.id, Vec::new()))
            .collect();
        for finding in &findings {
            by_item
                .entry(finding.item_id)
                .or_default()
                .push(finding.clone());
        }
        for (item_id, item_findings) in by_item.iter_mut() {
            item_findings.sort_by_key(|f| f.occurrence_index);
            self.results.replace_findings(*item_id, item_findings)?;
        }

        findings.sort_by_key(|f| (f.item_id, f.occurrence_index));
        let broken = findings.iter().filter(|f| f.status.is_finding()).count();

        tracing::info!(
            "Batch {}: {} items, {} checked, {} problems",
            run.job.batch_index,
            run.batch.items.len(),
            findings.len(),
            broken
        );

        status.finish_batch(
            run.batch.items.len() as u64,
            findings.len() as u64,
            broken as u64,
            run.batch.has_more_pages,
            self.clock.now(),
        );
        self.results.save_status(status)?;

        Ok(findings)
    }

    fn origin_for(&self, item: &ContentItem) -> OriginContext {
        let permalink = match &item.permalink {
            Some(permalink) => Some(permalink.clone()),
            None => self.content.permalink(item.id).unwrap_or_else(|e| {
                tracing::debug!("No permalink for item {}: {}", item.id, e);
                None
            }),
        };
        OriginContext::new(permalink.and_then(|p| Url::parse(&p).ok()))
    }

    /// HEAD said the page exists; a precise scan reads the body to rule out a soft 404
    fn needs_body_check(&self, probe: &PendingProbe) -> bool {
        if !self.detector.is_enabled()
            || self.scan.scan_method != ScanMethod::Precise
            || probe.candidate.kind != CandidateKind::Link
        {
            return false;
        }
        match &probe.outcome.response {
            Ok(response) => {
                response.is_success()
                    && response.body.is_none()
                    && response
                        .header("content-type")
                        .map_or(false, |ct| ct.to_ascii_lowercase().starts_with("text/html"))
            }
            Err(_) => false,
        }
    }

    async fn fetch_body(&self, outcome: DispatchOutcome) -> DispatchOutcome {
        let response = self
            .sender
            .request(ProbeMethod::Get, &outcome.url, &RequestArgs::default())
            .await;
        match response {
            Ok(response) if response.is_success() => DispatchOutcome {
                response: Ok(response),
                used_get_request: true,
                ..outcome
            },
            // Keep the HEAD verdict when the follow-up read fails
            _ => outcome,
        }
    }

    fn finding(
        &self,
        candidate: &Candidate,
        url: &str,
        status: LinkStatus,
        http_status: Option<u16>,
        reason: Option<String>,
    ) -> Finding {
        Finding {
            item_id: candidate.source_item_id,
            occurrence_index: candidate.occurrence_index,
            url: url.to_string(),
            kind: candidate.kind,
            status,
            http_status,
            reason,
            checked_at: self.clock.now(),
        }
    }

    fn rejected(&self, candidate: &Candidate, failure: NormalizeFailure) -> Finding {
        if failure.is_security_rejection() {
            tracing::warn!(
                "Item {} references {} ({})",
                candidate.source_item_id,
                candidate.raw_url,
                failure
            );
        }
        self.finding(
            candidate,
            &candidate.raw_url,
            LinkStatus::Rejected,
            None,
            Some(failure.reason().to_string()),
        )
    }
}
