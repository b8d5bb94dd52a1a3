// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job store: the records the upload server keeps for each uploaded file.
//
// The upload server owns the database; the kiosk only looks jobs up by
// pickup code, flags them printed, and removes them when the remote server
// revokes their token.
//
// Schema:
//   jobs(
//     code        TEXT PRIMARY KEY,   -- 4-digit pickup code
//     id          TEXT NOT NULL,      -- stored file name in FILEDIR
//     file_name   TEXT NOT NULL,      -- name the file was uploaded under
//     page_count  INTEGER NOT NULL,
//     config      TEXT NOT NULL,      -- JSON print settings, fields optional
//     printed     INTEGER NOT NULL DEFAULT 0,
//     created_at  TEXT NOT NULL       -- RFC 3339, UTC
//   )

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument, warn};

use kiosk_core::error::{KioskError, Result};
use kiosk_core::types::{FileEntry, JobCode, PrintConfiguration};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS jobs (
    code        TEXT PRIMARY KEY,
    id          TEXT NOT NULL,
    file_name   TEXT NOT NULL,
    page_count  INTEGER NOT NULL,
    config      TEXT NOT NULL,
    printed     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);";

fn db_err(e: rusqlite::Error) -> KioskError {
    KioskError::Database(e.to_string())
}

/// Lookup and bookkeeping of uploaded jobs.
pub trait JobStore: Send + Sync {
    fn find_by_code(&self, code: &JobCode) -> Result<Option<FileEntry>>;

    /// Flag the job as fully printed.
    fn mark_printed(&self, code: &JobCode) -> Result<()>;

    /// Drop the job. Returns whether it existed.
    fn remove(&self, code: &JobCode) -> Result<bool>;
}

/// `JobStore` over the upload server's SQLite file.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    /// Settings for fields a job's stored config leaves out.
    defaults: PrintConfiguration,
}

impl SqliteJobStore {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, defaults: PrintConfiguration) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        info!("job store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            defaults,
        })
    }

    pub fn open_in_memory(defaults: PrintConfiguration) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            defaults,
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| KioskError::Database("job store lock poisoned".into()))
    }

    /// Add a job the way the upload server does.
    pub fn insert(&self, entry: &FileEntry) -> Result<()> {
        let config = serde_json::to_string(&entry.config)?;
        self.conn()?
            .execute(
                "INSERT INTO jobs (code, id, file_name, page_count, config, printed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.code.as_str(),
                    entry.id,
                    entry.file_name,
                    entry.page_count,
                    config,
                    entry.printed,
                    entry.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                ],
            )
            .map_err(db_err)?;
        debug!(code = %entry.code, "job stored");
        Ok(())
    }
}

struct Row {
    code: String,
    id: String,
    file_name: String,
    page_count: u32,
    config: String,
    printed: bool,
    created_at: String,
}

impl JobStore for SqliteJobStore {
    #[instrument(skip(self), fields(code = %code))]
    fn find_by_code(&self, code: &JobCode) -> Result<Option<FileEntry>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT code, id, file_name, page_count, config, printed, created_at
                 FROM jobs WHERE code = ?1",
                params![code.as_str()],
                |row| {
                    Ok(Row {
                        code: row.get(0)?,
                        id: row.get(1)?,
                        file_name: row.get(2)?,
                        page_count: row.get(3)?,
                        config: row.get(4)?,
                        printed: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?;
        let Some(row) = row else {
            debug!("no job under this code");
            return Ok(None);
        };

        let config_value: serde_json::Value = if row.config.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&row.config)?
        };
        let config = PrintConfiguration::from_value_with_defaults(config_value, &self.defaults)?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                warn!(error = %e, raw = %row.created_at, "unreadable job timestamp");
                DateTime::<Utc>::default()
            });

        Ok(Some(FileEntry {
            code: JobCode::parse(&row.code)?,
            id: row.id,
            file_name: row.file_name,
            page_count: row.page_count,
            config,
            printed: row.printed,
            created_at,
        }))
    }

    #[instrument(skip(self), fields(code = %code))]
    fn mark_printed(&self, code: &JobCode) -> Result<()> {
        let updated = self
            .conn()?
            .execute("UPDATE jobs SET printed = 1 WHERE code = ?1", params![code.as_str()])
            .map_err(db_err)?;
        if updated == 0 {
            warn!("job vanished before it could be marked printed");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(code = %code))]
    fn remove(&self, code: &JobCode) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM jobs WHERE code = ?1", params![code.as_str()])
            .map_err(db_err)?;
        if removed > 0 {
            info!("job removed");
        }
        Ok(removed > 0)
    }
}
