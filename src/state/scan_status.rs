//! Progress snapshot of the current (or last) scan

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a scan as seen from outside
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// No scan has run yet
    #[default]
    Idle,

    /// A batch is being processed
    Running,

    /// Between batches, or deferred by a gate
    Waiting,

    /// The final batch finished
    Completed,

    /// The last batch aborted with an error
    Failed,
}

impl ScanState {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "waiting" => Some(Self::Waiting),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Snapshot persisted after each batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub state: ScanState,
    pub batch_index: u32,
    pub is_full_scan: bool,
    pub items_scanned: u64,
    pub links_checked: u64,
    pub broken_found: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ScanStatus {
    /// Marks a batch as running
    ///
    /// Batch 0 starts a new scan and resets the counters.
    pub fn begin_batch(&mut self, batch_index: u32, is_full_scan: bool, now: DateTime<Utc>) {
        if batch_index == 0 || self.started_at.is_none() {
            *self = ScanStatus {
                started_at: Some(now),
                ..ScanStatus::default()
            };
        }
        self.state = ScanState::Running;
        self.batch_index = batch_index;
        self.is_full_scan = is_full_scan;
        self.last_error = None;
        self.updated_at = Some(now);
    }

    /// Adds one batch worth of counters
    ///
    /// # Arguments
    ///
    /// * `items` - Content items scanned in the batch
    /// * `links` - Candidates checked (links and images)
    /// * `broken` - Candidates that produced a finding
    /// * `has_more` - Whether another batch follows
    /// * `now` - Current time
    pub fn finish_batch(
        &mut self,
        items: u64,
        links: u64,
        broken: u64,
        has_more: bool,
        now: DateTime<Utc>,
    ) {
        self.items_scanned += items;
        self.links_checked += links;
        self.broken_found += broken;
        self.state = if has_more {
            ScanState::Waiting
        } else {
            ScanState::Completed
        };
        self.updated_at = Some(now);
    }

    /// Marks the scan as deferred until a later invocation
    pub fn defer(&mut self, now: DateTime<Utc>) {
        if self.state != ScanState::Completed {
            self.state = ScanState::Waiting;
        }
        self.updated_at = Some(now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.state = ScanState::Failed;
        self.last_error = Some(error.into());
        self.updated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_counters_accumulate_across_batches() {
        let mut status = ScanStatus::default();
        assert_eq!(status.state, ScanState::Idle);

        status.begin_batch(0, true, at(1));
        status.finish_batch(20, 100, 3, true, at(1));
        assert_eq!(status.state, ScanState::Waiting);

        status.begin_batch(1, true, at(2));
        assert_eq!(status.state, ScanState::Running);
        status.finish_batch(5, 10, 1, false, at(2));

        assert_eq!(status.state, ScanState::Completed);
        assert_eq!(status.items_scanned, 25);
        assert_eq!(status.links_checked, 110);
        assert_eq!(status.broken_found, 4);
        assert_eq!(status.started_at, Some(at(1)));
        assert_eq!(status.updated_at, Some(at(2)));
    }

    #[test]
    fn test_first_batch_resets() {
        let mut status = ScanStatus::default();
        status.begin_batch(0, false, at(1));
        status.finish_batch(20, 40, 2, false, at(1));

        status.begin_batch(0, true, at(5));
        assert_eq!(status.items_scanned, 0);
        assert_eq!(status.started_at, Some(at(5)));
        assert!(status.is_full_scan);
    }

    #[test]
    fn test_fail_then_recover() {
        let mut status = ScanStatus::default();
        status.begin_batch(0, true, at(1));
        status.fail("database is locked", at(1));
        assert_eq!(status.state, ScanState::Failed);
        assert_eq!(status.last_error.as_deref(), Some("database is locked"));

        status.begin_batch(1, true, at(2));
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_state_db_strings() {
        for state in [
            ScanState::Idle,
            ScanState::Running,
            ScanState::Waiting,
            ScanState::Completed,
            ScanState::Failed,
        ] {
            assert_eq!(ScanState::from_db_string(state.to_db_string()), Some(state));
        }
    }
}
