// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Used-nonce store: SQLite record of every job-token nonce that has been
// spent, so a token can authorize at most one print. Entries are never
// removed: a nonce carries no issue time to age it out by.
//
// Schema:
//   used_nonces(
//     nonce    TEXT PRIMARY KEY,
//     code     TEXT NOT NULL,
//     used_at  TEXT NOT NULL    -- RFC 3339, UTC, microseconds
//   )

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use kiosk_core::error::{KioskError, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, instrument};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS used_nonces (
    nonce    TEXT PRIMARY KEY,
    code     TEXT NOT NULL,
    used_at  TEXT NOT NULL
);";

fn db_err(e: rusqlite::Error) -> KioskError {
    KioskError::Database(e.to_string())
}

fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed set of spent nonces.
pub struct UsedNonceStore {
    conn: Connection,
}

impl UsedNonceStore {
    /// Open (or create) the store at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!("used-nonce store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self { conn })
    }

    pub fn contains(&self, nonce: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM used_nonces WHERE nonce = ?1",
                params![nonce],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    /// Mark `nonce` as spent for `code`. Fails with `TokenNonceReused` if it
    /// already was.
    #[instrument(skip(self, nonce), fields(%code))]
    pub fn insert(&self, nonce: &str, code: &str) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO used_nonces (nonce, code, used_at) VALUES (?1, ?2, ?3)",
            params![nonce, code, timestamp(Utc::now())],
        );
        match result {
            Ok(_) => {
                debug!("nonce spent");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(KioskError::TokenNonceReused)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    /// Number of nonces currently on record.
    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM used_nonces", [], |row| row.get(0))
            .map_err(db_err)
    }
}
