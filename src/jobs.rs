//! Scheduled scan jobs and scheduling-failure events

use crate::storage::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Job name every scan batch is scheduled under
pub const SCAN_BATCH_JOB: &str = "linksweep_scan_batch";

/// One unit of scheduled scan work
///
/// Re-dispatching a batch creates a new job with the same `batch_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub batch_index: u32,
    pub is_full_scan: bool,
    pub bypass_rest_window: bool,
    pub scheduled_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(batch_index: u32, is_full_scan: bool, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            batch_index,
            is_full_scan,
            bypass_rest_window: false,
            scheduled_at,
        }
    }

    /// Same batch, new schedule time
    pub fn rescheduled(&self, at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: at,
            ..self.clone()
        }
    }

    /// The batch after this one
    pub fn next_batch(&self, at: DateTime<Utc>) -> Self {
        Self {
            batch_index: self.batch_index + 1,
            scheduled_at: at,
            ..self.clone()
        }
    }
}

/// Fires a job once at a given time
pub trait JobScheduler: Send + Sync {
    /// Returns false when the scheduler refused the job
    fn schedule_at(&self, at: DateTime<Utc>, job_name: &str, job: &ScanJob) -> bool;
}

/// The stored side of the scheduler: jobs waiting to run
pub trait JobQueue: Send + Sync {
    /// Removes and returns the oldest job due at `now`
    fn claim_next_due(&self, now: DateTime<Utc>) -> StorageResult<Option<ScanJob>>;

    /// Returns true while any scan job is queued, due or not
    fn has_pending(&self) -> StorageResult<bool>;
}

/// Events raised for collaborators (alerting, dashboards)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    /// The scheduler refused a job
    SchedulingFailed {
        batch_index: u32,
        is_full_scan: bool,
        bypass_rest_window: bool,
        at: DateTime<Utc>,
        reason: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

/// Logs events as warnings
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ScanEvent) {
        match &event {
            ScanEvent::SchedulingFailed {
                batch_index,
                is_full_scan,
                reason,
                at,
                ..
            } => tracing::warn!(
                target: "linksweep::events",
                batch = batch_index,
                full = is_full_scan,
                "Failed to schedule batch {} for {} ({})",
                batch_index,
                at,
                reason
            ),
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEvents {
    events: Mutex<Vec<ScanEvent>>,
}

impl MemoryEvents {
    pub fn events(&self) -> Vec<ScanEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemoryEvents {
    fn emit(&self, event: ScanEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// In-memory scheduler that can be told to refuse jobs
#[derive(Debug, Default)]
pub struct MemoryScheduler {
    jobs: Mutex<Vec<(DateTime<Utc>, String, ScanJob)>>,
    refuse: bool,
}

impl MemoryScheduler {
    /// A scheduler that refuses every job
    pub fn refusing() -> Self {
        Self {
            jobs: Mutex::default(),
            refuse: true,
        }
    }

    pub fn scheduled(&self) -> Vec<(DateTime<Utc>, String, ScanJob)> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }
}

impl JobScheduler for MemoryScheduler {
    fn schedule_at(&self, at: DateTime<Utc>, job_name: &str, job: &ScanJob) -> bool {
        if self.refuse {
            return false;
        }
        match self.jobs.lock() {
            Ok(mut jobs) => {
                jobs.push((at, job_name.to_string(), job.clone()));
                true
            }
            Err(_) => false,
        }
    }
}

impl JobQueue for MemoryScheduler {
    fn claim_next_due(&self, now: DateTime<Utc>) -> StorageResult<Option<ScanJob>> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| StorageError::Database("job list poisoned".to_string()))?;
        let next = jobs
            .iter()
            .enumerate()
            .filter(|(_, (at, name, _))| *at <= now && name == SCAN_BATCH_JOB)
            .min_by_key(|(i, (at, _, _))| (*at, *i))
            .map(|(i, _)| i);
        Ok(next.map(|i| jobs.remove(i).2))
    }

    fn has_pending(&self) -> StorageResult<bool> {
        Ok(self
            .scheduled()
            .iter()
            .any(|(_, name, _)| name == SCAN_BATCH_JOB))
    }
}

/// Schedules a job, raising an event when the scheduler refuses it
///
/// # Returns
///
/// Whether the job was accepted
pub fn schedule_or_report(
    scheduler: &dyn JobScheduler,
    events: &dyn EventSink,
    job: &ScanJob,
    reason: &str,
) -> bool {
    if scheduler.schedule_at(job.scheduled_at, SCAN_BATCH_JOB, job) {
        tracing::debug!(
            "Scheduled batch {} at {} ({})",
            job.batch_index,
            job.scheduled_at,
            reason
        );
        return true;
    }

    events.emit(ScanEvent::SchedulingFailed {
        batch_index: job.batch_index,
        is_full_scan: job.is_full_scan,
        bypass_rest_window: job.bypass_rest_window,
        at: job.scheduled_at,
        reason: reason.to_string(),
    });
    false
}
