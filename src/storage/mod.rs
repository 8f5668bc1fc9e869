//! Storage module for persisting scan data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Content items the scan reads from
//! - Scheduled jobs, the scan lock and proxy health
//! - Findings, status snapshots and checkpoints

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::scan::CandidateKind;
use crate::state::LinkStatus;
use crate::SweepError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(SweepError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, SweepError> {
    SqliteStorage::new(path)
}

/// Verdict for one link or image occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub item_id: i64,
    pub occurrence_index: u32,
    pub url: String,
    pub kind: CandidateKind,
    pub status: LinkStatus,
    pub http_status: Option<u16>,
    pub reason: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Formats a timestamp so that text order matches time order
pub(crate) fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(column: &'static str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp {
            column,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_time_roundtrip_and_order() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 11, 2, 3, 4, 5).unwrap();

        assert_eq!(to_db_time(early), "2024-01-02T03:04:05.000000Z");
        assert_eq!(from_db_time("t", &to_db_time(early)).unwrap(), early);
        assert!(to_db_time(early) < to_db_time(late));
    }

    #[test]
    fn test_invalid_db_time() {
        let err = from_db_time("modified_at", "yesterday").unwrap_err();
        assert!(err.to_string().contains("modified_at"));
    }
}
