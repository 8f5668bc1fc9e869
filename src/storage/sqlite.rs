//! SQLite storage implementation
//!
//! One database holds the content mirror, the job table, the scan lock, proxy
//! health and the scan results. `SqliteStorage` implements every narrow
//! storage trait the engine consumes.

use crate::clock::{Clock, SystemClock};
use crate::jobs::{JobQueue, JobScheduler, ScanJob, SCAN_BATCH_JOB};
use crate::orchestrator::{new_token, LockPrimitive};
use crate::proxy::{HealthStore, ProxyHealthState};
use crate::queue::{ContentItem, ContentPage, ContentQuery, ContentRepository};
use crate::scan::CandidateKind;
use crate::state::{LinkStatus, ScanStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{from_db_time, to_db_time, Finding};
use crate::SweepError;
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const LAST_CHECK: &str = "last_check";

const FINDING_COLUMNS: &str =
    "item_id, occurrence_index, url, kind, status, http_status, reason, checked_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SweepError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SweepError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, SweepError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        }
    }

    /// Uses `clock` for lock expiry and record timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }

    // ===== Content =====

    /// Inserts or replaces a content item
    pub fn upsert_content_item(&self, item: &ContentItem) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT INTO content_items (id, title, body_html, modified_at, content_type, status, permalink)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                body_html = excluded.body_html,
                modified_at = excluded.modified_at,
                content_type = excluded.content_type,
                status = excluded.status,
                permalink = excluded.permalink",
            params![
                item.id,
                item.title,
                item.body_html,
                to_db_time(item.modified_at),
                item.content_type,
                item.status,
                item.permalink
            ],
        )?;
        Ok(())
    }

    // ===== Jobs =====

    /// Removes and returns the oldest scan job due at `now`
    ///
    /// Jobs are claimed one at a time so a batch that fails leaves the rest
    /// of the queue in place.
    pub fn claim_next_due_job(&self, now: DateTime<Utc>) -> StorageResult<Option<ScanJob>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let due: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, payload FROM scan_jobs
                 WHERE job_name = ?1 AND run_at <= ?2
                 ORDER BY run_at, id
                 LIMIT 1",
                params![SCAN_BATCH_JOB, to_db_time(now)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, payload)) = due else {
            return Ok(None);
        };

        tx.execute("DELETE FROM scan_jobs WHERE id = ?1", params![id])?;
        tx.commit()?;

        Ok(Some(serde_json::from_str(&payload)?))
    }

    /// Lists scheduled scan jobs without removing them
    pub fn pending_jobs(&self) -> StorageResult<Vec<ScanJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM scan_jobs WHERE job_name = ?1 ORDER BY run_at, id",
        )?;
        let payloads = stmt
            .query_map(params![SCAN_BATCH_JOB], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(StorageError::from))
            .collect()
    }

    fn insert_job(&self, at: DateTime<Utc>, job_name: &str, job: &ScanJob) -> StorageResult<()> {
        let payload = serde_json::to_string(job)?;
        self.conn()?.execute(
            "INSERT INTO scan_jobs (job_name, run_at, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![job_name, to_db_time(at), payload, to_db_time(self.clock.now())],
        )?;
        Ok(())
    }

    // ===== Lock =====

    fn try_acquire_lock(&self, timeout_seconds: u64) -> StorageResult<Option<String>> {
        let now = self.clock.now();
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let expires_at: Option<String> = tx
            .query_row("SELECT expires_at FROM scan_lock WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(expires_at) = expires_at {
            if from_db_time("expires_at", &expires_at)? > now {
                return Ok(None);
            }
        }

        let token = new_token();
        tx.execute(
            "INSERT OR REPLACE INTO scan_lock (id, token, acquired_at, expires_at) VALUES (1, ?1, ?2, ?3)",
            params![
                token,
                to_db_time(now),
                to_db_time(now + Duration::seconds(timeout_seconds as i64))
            ],
        )?;
        tx.commit()?;

        Ok(Some(token))
    }

    /// Token and expiry of the current lock, if one is held
    pub fn current_lock(&self) -> StorageResult<Option<(String, DateTime<Utc>)>> {
        let row: Option<(String, String)> = self
            .conn()?
            .query_row("SELECT token, expires_at FROM scan_lock WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        match row {
            Some((token, expires_at)) => {
                let expires_at = from_db_time("expires_at", &expires_at)?;
                Ok((expires_at > self.clock.now()).then_some((token, expires_at)))
            }
            None => Ok(None),
        }
    }

    // ===== Proxy Health =====

    fn read_health(&self, proxy_id: &str) -> StorageResult<Option<ProxyHealthState>> {
        let state: Option<String> = self
            .conn()?
            .query_row(
                "SELECT state FROM proxy_health WHERE proxy_id = ?1",
                params![proxy_id],
                |row| row.get(0),
            )
            .optional()?;

        state
            .map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    fn write_health(&self, proxy_id: &str, state: &ProxyHealthState) -> StorageResult<()> {
        let json = serde_json::to_string(state)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO proxy_health (proxy_id, state, updated_at) VALUES (?1, ?2, ?3)",
            params![proxy_id, json, to_db_time(self.clock.now())],
        )?;
        Ok(())
    }

    fn query_findings(&self, filter: &str, value: Value) -> StorageResult<Vec<Finding>> {
        type RawFinding = (i64, u32, String, String, String, Option<u16>, Option<String>, String);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM findings WHERE {} = ?1 ORDER BY item_id, occurrence_index",
            FINDING_COLUMNS, filter
        ))?;

        let rows: Vec<RawFinding> = stmt
            .query_map([value], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(item_id, occurrence_index, url, kind, status, http_status, reason, checked_at)| {
                    Ok(Finding {
                        item_id,
                        occurrence_index,
                        url,
                        kind: CandidateKind::from_db_string(&kind).unwrap_or(CandidateKind::Link),
                        status: LinkStatus::from_db_string(&status).unwrap_or(LinkStatus::Unknown),
                        http_status,
                        reason,
                        checked_at: from_db_time("checked_at", &checked_at)?,
                    })
                },
            )
            .collect()
    }
}

impl ContentRepository for SqliteStorage {
    fn query(&self, query: &ContentQuery) -> StorageResult<ContentPage> {
        if query.content_types.is_empty() || query.statuses.is_empty() {
            return Ok(ContentPage::default());
        }

        let mut clauses = vec![
            format!("content_type IN ({})", placeholders(query.content_types.len())),
            format!("status IN ({})", placeholders(query.statuses.len())),
        ];
        let mut values: Vec<Value> = query
            .content_types
            .iter()
            .chain(query.statuses.iter())
            .cloned()
            .map(Value::Text)
            .collect();

        if let Some(after) = query.modified_after {
            clauses.push("modified_at > ?".to_string());
            values.push(Value::Text(to_db_time(after)));
        }
        let where_clause = clauses.join(" AND ");

        let conn = self.conn()?;

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM content_items WHERE {}", where_clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(i64::from(query.limit)));
        values.push(Value::Integer(query.offset as i64));

        let mut stmt = conn.prepare(&format!(
            "SELECT id, title, body_html, modified_at, content_type, status, permalink
             FROM content_items WHERE {} ORDER BY id LIMIT ? OFFSET ?",
            where_clause
        ))?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let items = rows
            .into_iter()
            .map(
                |(id, title, body_html, modified_at, content_type, status, permalink)| {
                    Ok(ContentItem {
                        id,
                        title,
                        body_html,
                        modified_at: from_db_time("modified_at", &modified_at)?,
                        content_type,
                        status,
                        permalink,
                    })
                },
            )
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(ContentPage {
            items,
            total: total.max(0) as u64,
        })
    }

    fn permalink(&self, id: i64) -> StorageResult<Option<String>> {
        let permalink: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT permalink FROM content_items WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(permalink.flatten())
    }
}

impl JobScheduler for SqliteStorage {
    fn schedule_at(&self, at: DateTime<Utc>, job_name: &str, job: &ScanJob) -> bool {
        match self.insert_job(at, job_name, job) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to store job {}: {}", job_name, e);
                false
            }
        }
    }
}

impl JobQueue for SqliteStorage {
    fn claim_next_due(&self, now: DateTime<Utc>) -> StorageResult<Option<ScanJob>> {
        self.claim_next_due_job(now)
    }

    fn has_pending(&self) -> StorageResult<bool> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM scan_jobs WHERE job_name = ?1",
            params![SCAN_BATCH_JOB],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl LockPrimitive for SqliteStorage {
    fn acquire(&self, timeout_seconds: u64) -> Option<String> {
        match self.try_acquire_lock(timeout_seconds) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Failed to acquire scan lock: {}", e);
                None
            }
        }
    }

    fn release(&self, token: &str) {
        let result = self
            .conn()
            .and_then(|conn| Ok(conn.execute("DELETE FROM scan_lock WHERE token = ?1", params![token])?));
        if let Err(e) = result {
            tracing::warn!("Failed to release scan lock: {}", e);
        }
    }
}

impl HealthStore for SqliteStorage {
    fn load(&self, proxy_id: &str) -> Option<ProxyHealthState> {
        self.read_health(proxy_id).unwrap_or_else(|e| {
            tracing::warn!("Failed to read health of proxy {}: {}", proxy_id, e);
            None
        })
    }

    fn store(&self, proxy_id: &str, state: &ProxyHealthState) {
        if let Err(e) = self.write_health(proxy_id, state) {
            tracing::warn!("Failed to store health of proxy {}: {}", proxy_id, e);
        }
    }
}

impl Storage for SqliteStorage {
    // ===== Findings =====

    fn replace_findings(&self, item_id: i64, findings: &[Finding]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM findings WHERE item_id = ?1", params![item_id])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO findings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                FINDING_COLUMNS
            ))?;
            for finding in findings {
                stmt.execute(params![
                    item_id,
                    finding.occurrence_index,
                    finding.url,
                    finding.kind.to_db_string(),
                    finding.status.to_db_string(),
                    finding.http_status,
                    finding.reason,
                    to_db_time(finding.checked_at)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn findings_for_item(&self, item_id: i64) -> StorageResult<Vec<Finding>> {
        self.query_findings("item_id", Value::Integer(item_id))
    }

    fn findings_by_status(&self, status: LinkStatus) -> StorageResult<Vec<Finding>> {
        self.query_findings("status", Value::Text(status.to_db_string().to_string()))
    }

    fn count_findings_by_status(&self) -> StorageResult<HashMap<LinkStatus, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM findings GROUP BY status")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(status) = LinkStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    // ===== Progress =====

    fn save_status(&self, status: &ScanStatus) -> StorageResult<()> {
        let payload = serde_json::to_string(status)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO scan_status (id, payload) VALUES (1, ?1)",
            params![payload],
        )?;
        Ok(())
    }

    fn load_status(&self) -> StorageResult<Option<ScanStatus>> {
        let payload: Option<String> = self
            .conn()?
            .query_row("SELECT payload FROM scan_status WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        payload
            .map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    fn last_check(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM scan_checkpoints WHERE name = ?1",
                params![LAST_CHECK],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|value| from_db_time("scan_checkpoints.value", &value))
            .transpose()
    }

    fn set_last_check(&self, at: DateTime<Utc>) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO scan_checkpoints (name, value) VALUES (?1, ?2)",
            params![LAST_CHECK, to_db_time(at)],
        )?;
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
