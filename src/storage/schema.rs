//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Probe database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Scan jobs and their lifecycle status
CREATE TABLE IF NOT EXISTS scan_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_url TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per unique normalized URL per scan
CREATE TABLE IF NOT EXISTS discovered_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL REFERENCES scan_jobs(id),
    url TEXT NOT NULL,
    status_code INTEGER,
    depth INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    error_message TEXT,
    recorded_at TEXT NOT NULL,
    UNIQUE(scan_id, url)
);

CREATE INDEX IF NOT EXISTS idx_discovered_scan ON discovered_urls(scan_id);

-- Forms found on crawled pages
CREATE TABLE IF NOT EXISTS extracted_forms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL REFERENCES scan_jobs(id),
    page_url TEXT NOT NULL,
    action TEXT NOT NULL,
    method TEXT NOT NULL,
    fields TEXT NOT NULL,
    UNIQUE(scan_id, page_url, action, method)
);

CREATE INDEX IF NOT EXISTS idx_forms_scan ON extracted_forms(scan_id);

-- Technology fingerprints, deduplicated per scan
CREATE TABLE IF NOT EXISTS fingerprints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL REFERENCES scan_jobs(id),
    name TEXT NOT NULL,
    version TEXT NOT NULL DEFAULT '',
    source_url TEXT NOT NULL,
    UNIQUE(scan_id, name, version)
);

CREATE INDEX IF NOT EXISTS idx_fingerprints_scan ON fingerprints(scan_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
