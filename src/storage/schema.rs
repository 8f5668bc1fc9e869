//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Linksweep database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Site content to scan
CREATE TABLE IF NOT EXISTS content_items (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    body_html TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    content_type TEXT NOT NULL,
    status TEXT NOT NULL,
    permalink TEXT
);

CREATE INDEX IF NOT EXISTS idx_content_filter ON content_items(content_type, status);
CREATE INDEX IF NOT EXISTS idx_content_modified ON content_items(modified_at);

-- One-shot scheduled jobs
CREATE TABLE IF NOT EXISTS scan_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_name TEXT NOT NULL,
    run_at TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_jobs_run_at ON scan_jobs(run_at);

-- The single scan lock row
CREATE TABLE IF NOT EXISTS scan_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    token TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Circuit breaker state per proxy
CREATE TABLE IF NOT EXISTS proxy_health (
    proxy_id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Verdict per checked link or image occurrence
CREATE TABLE IF NOT EXISTS findings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    occurrence_index INTEGER NOT NULL,
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    http_status INTEGER,
    reason TEXT,
    checked_at TEXT NOT NULL,
    UNIQUE(item_id, occurrence_index)
);

CREATE INDEX IF NOT EXISTS idx_findings_status ON findings(status);

-- Latest scan progress snapshot
CREATE TABLE IF NOT EXISTS scan_status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    payload TEXT NOT NULL
);

-- Named UTC checkpoints
CREATE TABLE IF NOT EXISTS scan_checkpoints (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in [
            "content_items",
            "scan_jobs",
            "scan_lock",
            "proxy_health",
            "findings",
            "scan_status",
            "scan_checkpoints",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
