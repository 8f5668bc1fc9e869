//! Invocation state machine
//!
//! Each invocation ends in exactly one of three states: the batch ran, the
//! batch was rescheduled, or the request was rejected.

use crate::clock::Clock;
use crate::jobs::{schedule_or_report, EventSink, JobScheduler, ScanJob};
use crate::orchestrator::lock::{LockManager, ScanLock};
use crate::orchestrator::preflight::{LoadProbe, Preflight, Trigger};
use crate::queue::{BatchResult, NextBatch, ScanQueue};
use crate::SweepError;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;

/// Minimum delay before retrying a batch that found the lock busy
const MIN_LOCK_RETRY_SECS: u64 = 60;

/// Why a batch was put off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescheduleReason {
    LockUnavailable,
    RestWindow,
    ServerLoad,
}

impl RescheduleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockUnavailable => "lock_unavailable",
            Self::RestWindow => "rest_window",
            Self::ServerLoad => "server_load",
        }
    }
}

impl fmt::Display for RescheduleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch cleared to run; the holder owns the scan lock
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub lock: ScanLock,
    /// The job with on-demand overrides applied
    pub job: ScanJob,
    pub batch: BatchResult,
}

/// Terminal state of one invocation
#[derive(Debug)]
pub enum InvocationOutcome {
    Ran(ScanRun),
    Rescheduled {
        reason: RescheduleReason,
        job: ScanJob,
        /// False when the scheduler refused the job (an event was raised)
        scheduled: bool,
    },
    Rejected(SweepError),
}

/// Runs the preflight, lock and gate sequence for each scan invocation
pub struct Orchestrator {
    locks: LockManager,
    preflight: Preflight,
    queue: Arc<ScanQueue>,
    scheduler: Arc<dyn JobScheduler>,
    events: Arc<dyn EventSink>,
    load: Arc<dyn LoadProbe>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        locks: LockManager,
        preflight: Preflight,
        queue: Arc<ScanQueue>,
        scheduler: Arc<dyn JobScheduler>,
        events: Arc<dyn EventSink>,
        load: Arc<dyn LoadProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locks,
            preflight,
            queue,
            scheduler,
            events,
            load,
            clock,
        }
    }

    /// Runs one invocation
    ///
    /// # Arguments
    ///
    /// * `trigger` - Recurring (scheduled) or on-demand
    /// * `job` - The batch to run
    /// * `last_check` - Checkpoint of the last completed scan, for delta scans
    ///
    /// # Returns
    ///
    /// The terminal state. `Err` only for storage failures while loading the
    /// batch; the lock is released before returning it.
    pub fn invoke(
        &self,
        trigger: Trigger,
        job: &ScanJob,
        last_check: Option<DateTime<Utc>>,
    ) -> crate::Result<InvocationOutcome> {
        let job = match trigger {
            Trigger::OnDemand => ScanJob {
                is_full_scan: true,
                bypass_rest_window: true,
                ..job.clone()
            },
            Trigger::Recurring => job.clone(),
        };

        let lock = match self.locks.acquire() {
            Some(lock) => lock,
            None => {
                return Ok(match trigger {
                    Trigger::Recurring => {
                        let delay = self.preflight.batch_delay.max(MIN_LOCK_RETRY_SECS);
                        let at = self.clock.now() + Duration::seconds(delay as i64);
                        self.reschedule(&job, at, RescheduleReason::LockUnavailable)
                    }
                    Trigger::OnDemand => {
                        tracing::info!("Scan requested while another scan holds the lock");
                        InvocationOutcome::Rejected(SweepError::AlreadyRunning)
                    }
                });
            }
        };

        let now = self.clock.now();

        if !job.bypass_rest_window {
            if let Some(end) = self.preflight.rest_window_end(now) {
                self.locks.release(&lock);
                tracing::info!("Inside rest window, deferring batch {} to {}", job.batch_index, end);
                return Ok(self.reschedule(&job, end, RescheduleReason::RestWindow));
            }
        }

        if let Some(load) = self.preflight.overloaded(self.load.load_average()) {
            self.locks.release(&lock);
            tracing::info!(
                "Load {:.2} above {:.2}, deferring batch {}",
                load,
                self.preflight.load_threshold,
                job.batch_index
            );
            let at = now + Duration::seconds(self.preflight.load_delay as i64);
            return Ok(self.reschedule(&job, at, RescheduleReason::ServerLoad));
        }

        let batch = match self
            .queue
            .load_batch(job.batch_index, job.is_full_scan, last_check)
        {
            Ok(batch) => batch,
            Err(e) => {
                self.locks.release(&lock);
                return Err(e.into());
            }
        };

        tracing::info!(
            "Running batch {} ({} items, full scan: {})",
            job.batch_index,
            batch.items.len(),
            job.is_full_scan
        );

        Ok(InvocationOutcome::Ran(ScanRun { lock, job, batch }))
    }

    /// Releases the lock of a finished run and schedules its follow-up batch
    pub fn finish(&self, run: &ScanRun) -> NextBatch {
        self.locks.release(&run.lock);
        self.queue.schedule_next_batch_if_needed(&run.job, &run.batch)
    }

    /// Releases the lock of a run that failed part way; no follow-up is scheduled
    pub fn abandon(&self, run: &ScanRun) {
        tracing::warn!("Abandoning batch {}", run.job.batch_index);
        self.locks.release(&run.lock);
    }

    pub fn queue(&self) -> &Arc<ScanQueue> {
        &self.queue
    }

    fn reschedule(&self, job: &ScanJob, at: DateTime<Utc>, reason: RescheduleReason) -> InvocationOutcome {
        let job = job.rescheduled(at);
        let scheduled = schedule_or_report(
            self.scheduler.as_ref(),
            self.events.as_ref(),
            &job,
            reason.as_str(),
        );
        if !scheduled {
            tracing::warn!(
                "Scheduler refused batch {} ({}), it will not run until triggered again",
                job.batch_index,
                reason
            );
        }
        InvocationOutcome::Rescheduled {
            reason,
            job,
            scheduled,
        }
    }
}
