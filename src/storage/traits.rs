//! Storage traits and error types
//!
//! This module defines the result-store interface and the storage error type.
//! Content, jobs, locks and proxy health have their own narrow traits next to
//! the code that consumes them.

use crate::state::{LinkStatus, ScanStatus};
use crate::storage::Finding;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for scan results and progress
///
/// Implementations must be safe to share between threads.
pub trait Storage: Send + Sync {
    // ===== Findings =====

    /// Replaces every finding recorded for one content item
    ///
    /// # Arguments
    ///
    /// * `item_id` - The content item that was scanned
    /// * `findings` - One record per checked occurrence
    fn replace_findings(&self, item_id: i64, findings: &[Finding]) -> StorageResult<()>;

    /// Gets the findings of one content item, ordered by occurrence
    fn findings_for_item(&self, item_id: i64) -> StorageResult<Vec<Finding>>;

    /// Gets every finding with the given status
    fn findings_by_status(&self, status: LinkStatus) -> StorageResult<Vec<Finding>>;

    /// Counts findings by status
    fn count_findings_by_status(&self) -> StorageResult<HashMap<LinkStatus, u64>>;

    // ===== Progress =====

    /// Stores the latest scan status snapshot
    fn save_status(&self, status: &ScanStatus) -> StorageResult<()>;

    /// Loads the latest scan status snapshot
    fn load_status(&self) -> StorageResult<Option<ScanStatus>>;

    /// Gets the UTC checkpoint of the last completed scan
    fn last_check(&self) -> StorageResult<Option<DateTime<Utc>>>;

    /// Saves the UTC checkpoint of a completed scan
    fn set_last_check(&self, at: DateTime<Utc>) -> StorageResult<()>;
}
