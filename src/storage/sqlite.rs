//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ScanStore trait.

use crate::crawler::{FormDescriptor, FormField};
use crate::fingerprint::TechSignal;
use crate::state::{PageOutcome, ScanStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ScanStore, StorageError, StorageResult};
use crate::storage::{DiscoveredUrl, ExtractedForm, ScanJob, TechnologyFingerprint};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// SQLite storage backend
///
/// The connection sits behind a mutex so the store can be shared by every
/// worker of a scan.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ScanJob> {
    let target: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(ScanJob {
        id: row.get(0)?,
        target: Url::parse(&target).map_err(|e| conversion_error(1, e))?,
        status: ScanStatus::from_db_string(&status).unwrap_or(ScanStatus::Failed),
        created_at: parse_timestamp(row, 3)?,
        updated_at: parse_timestamp(row, 4)?,
    })
}

impl ScanStore for SqliteStore {
    // ===== Job Management =====

    fn create_job(&self, target: &Url) -> StorageResult<ScanJob> {
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scan_jobs (target_url, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![target.as_str(), ScanStatus::Queued.to_db_string(), timestamp(&now)],
        )?;

        Ok(ScanJob {
            id: conn.last_insert_rowid(),
            target: target.clone(),
            status: ScanStatus::Queued,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_job(&self, scan_id: i64) -> StorageResult<ScanJob> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, target_url, status, created_at, updated_at FROM scan_jobs WHERE id = ?1",
            params![scan_id],
            job_from_row,
        )
        .optional()?
        .ok_or(StorageError::JobNotFound(scan_id))
    }

    fn update_job_status(
        &self,
        scan_id: i64,
        status: ScanStatus,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn()?.execute(
            "UPDATE scan_jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), timestamp(&updated_at), scan_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(scan_id));
        }
        Ok(())
    }

    // ===== Artifacts =====

    fn save_discovered_url(&self, record: &DiscoveredUrl) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO discovered_urls
             (scan_id, url, status_code, depth, outcome, error_message, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.scan_id,
                record.url,
                record.status_code,
                record.depth,
                record.outcome.to_db_string(),
                record.error,
                timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn save_extracted_form(&self, record: &ExtractedForm) -> StorageResult<bool> {
        let fields = serde_json::to_string(&record.form.fields)?;
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO extracted_forms (scan_id, page_url, action, method, fields)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.scan_id,
                record.page_url,
                record.form.action,
                record.form.method,
                fields
            ],
        )?;
        Ok(inserted > 0)
    }

    fn save_fingerprint(&self, record: &TechnologyFingerprint) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO fingerprints (scan_id, name, version, source_url)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.scan_id,
                record.signal.name,
                record.signal.version.as_deref().unwrap_or(""),
                record.source_url
            ],
        )?;
        Ok(())
    }

    // ===== Queries =====

    fn list_discovered_urls(&self, scan_id: i64) -> StorageResult<Vec<DiscoveredUrl>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scan_id, url, status_code, depth, outcome, error_message
             FROM discovered_urls WHERE scan_id = ?1 ORDER BY depth ASC, url ASC",
        )?;

        let urls = stmt
            .query_map(params![scan_id], |row| {
                Ok(DiscoveredUrl {
                    scan_id: row.get(0)?,
                    url: row.get(1)?,
                    status_code: row.get(2)?,
                    depth: row.get(3)?,
                    outcome: PageOutcome::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(PageOutcome::Failed),
                    error: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(urls)
    }

    fn list_forms(&self, scan_id: i64) -> StorageResult<Vec<ExtractedForm>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scan_id, page_url, action, method, fields
             FROM extracted_forms WHERE scan_id = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map(params![scan_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut forms = Vec::with_capacity(rows.len());
        for (scan_id, page_url, action, method, fields) in rows {
            let fields: Vec<FormField> = serde_json::from_str(&fields)?;
            forms.push(ExtractedForm {
                scan_id,
                page_url,
                form: FormDescriptor {
                    action,
                    method,
                    fields,
                },
            });
        }

        Ok(forms)
    }

    fn list_fingerprints(&self, scan_id: i64) -> StorageResult<Vec<TechnologyFingerprint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scan_id, name, version, source_url
             FROM fingerprints WHERE scan_id = ?1 ORDER BY name ASC",
        )?;

        let fingerprints = stmt
            .query_map(params![scan_id], |row| {
                let version: String = row.get(2)?;
                Ok(TechnologyFingerprint {
                    scan_id: row.get(0)?,
                    source_url: row.get(3)?,
                    signal: TechSignal {
                        name: row.get(1)?,
                        version: (!version.is_empty()).then_some(version),
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(fingerprints)
    }

    // ===== Statistics =====

    fn count_discovered_urls(&self, scan_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM discovered_urls WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_by_outcome(&self, scan_id: i64) -> StorageResult<HashMap<PageOutcome, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT outcome, COUNT(*) FROM discovered_urls WHERE scan_id = ?1 GROUP BY outcome",
        )?;

        let rows = stmt
            .query_map(params![scan_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (outcome, count) in rows {
            match PageOutcome::from_db_string(&outcome) {
                Some(outcome) => {
                    counts.insert(outcome, count as u64);
                }
                None => {
                    return Err(StorageError::Database(format!(
                        "unknown outcome '{}' in discovered_urls",
                        outcome
                    )))
                }
            }
        }

        Ok(counts)
    }
}
