//! Store bootstrap, session and user rows, and the reconciliation queries.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::{Result, SessionRow, StalledSession, StoreError, UserRow};

/// Relational store for sessions, users, and question rows.
///
/// The connection is serialized behind a mutex; individual operations are
/// short parameterized statements, and the ledger's answer-save path runs
/// inside a single transaction (see [`Store::save_answer_and_get_next`]).
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    phone        TEXT,
    full_name    TEXT,
    external_ref TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id                 INTEGER NOT NULL REFERENCES users (id),
    external_user_ref       TEXT NOT NULL,
    bearer_token            TEXT,
    token_expiry            TEXT,
    created_at              TEXT NOT NULL,
    quiz_completed          INTEGER NOT NULL DEFAULT 0,
    quiz_analysis_generated INTEGER NOT NULL DEFAULT 0,
    reconciliation_fired_at TEXT,
    settlement_payload      TEXT,
    order_id                TEXT
);

CREATE TABLE IF NOT EXISTS questions (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id     INTEGER NOT NULL REFERENCES sessions (id) ON DELETE CASCADE,
    user_id        INTEGER NOT NULL REFERENCES users (id),
    question_no    INTEGER NOT NULL,
    prompt         TEXT NOT NULL,
    answer         TEXT NOT NULL DEFAULT '',
    correct_answer TEXT NOT NULL,
    answered       INTEGER NOT NULL DEFAULT 0,
    bank_id        INTEGER NOT NULL,
    scenario       TEXT NOT NULL DEFAULT '',
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    UNIQUE (session_id, question_no)
);
";

impl Store {
    /// Opens (or creates) a store at the given path and bootstraps the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store. Used by tests and throwaway runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("store schema bootstrapped");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Creates a user row and returns it.
    pub fn create_user(
        &self,
        phone: Option<&str>,
        full_name: Option<&str>,
        external_ref: &str,
    ) -> Result<UserRow> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (phone, full_name, external_ref, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![phone, full_name, external_ref, now_string()],
        )?;
        let id = conn.last_insert_rowid();
        Self::user_by_id(&conn, id)
    }

    /// Fetches a user row by id.
    pub fn get_user(&self, user_id: i64) -> Result<UserRow> {
        let conn = self.lock();
        Self::user_by_id(&conn, user_id)
    }

    fn user_by_id(conn: &Connection, user_id: i64) -> Result<UserRow> {
        conn.query_row(
            "SELECT id, phone, full_name, external_ref, created_at
             FROM users WHERE id = ?1",
            params![user_id],
            Self::map_user_row,
        )
        .optional()?
        .ok_or(StoreError::UserNotFound { user_id })
    }

    fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
        Ok(UserRow {
            id: row.get(0)?,
            phone: row.get(1)?,
            full_name: row.get(2)?,
            external_ref: row.get(3)?,
            created_at: ts(row, 4)?,
        })
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Creates a session row for the given user and returns it.
    pub fn create_session(&self, user_id: i64, external_user_ref: &str) -> Result<SessionRow> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sessions (user_id, external_user_ref, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, external_user_ref, now_string()],
        )?;
        let id = conn.last_insert_rowid();
        Self::session_by_id(&conn, id)
    }

    /// Fetches a session row by id. A missing session is a hard error.
    pub fn get_session(&self, session_id: i64) -> Result<SessionRow> {
        let conn = self.lock();
        Self::session_by_id(&conn, session_id)
    }

    /// Stores a fresh bearer credential (and its expiry) on the session row.
    pub fn set_bearer_token(
        &self,
        session_id: i64,
        token: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE sessions SET bearer_token = ?1, token_expiry = ?2 WHERE id = ?3",
            params![token, expiry.map(ts_string), session_id],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound { session_id });
        }
        Ok(())
    }

    /// Stores the order identifier returned by paid-test creation.
    pub fn set_order_id(&self, session_id: i64, order_id: &str) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE sessions SET order_id = ?1 WHERE id = ?2",
            params![order_id, session_id],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound { session_id });
        }
        Ok(())
    }

    /// The settlement pipeline's single finalization write: completion flag,
    /// analysis flag, serialized scored answers, and the order identifier.
    pub fn finalize_session(
        &self,
        session_id: i64,
        analysis_generated: bool,
        settlement_payload: &str,
        order_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE sessions
             SET quiz_completed = 1,
                 quiz_analysis_generated = ?1,
                 settlement_payload = ?2,
                 order_id = ?3
             WHERE id = ?4",
            params![analysis_generated, settlement_payload, order_id, session_id],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound { session_id });
        }
        Ok(())
    }

    /// Stamps the one-time re-engagement timestamp on the session row.
    pub fn stamp_reconciliation(&self, session_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE sessions SET reconciliation_fired_at = ?1 WHERE id = ?2",
            params![ts_string(at), session_id],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound { session_id });
        }
        Ok(())
    }

    pub(crate) fn session_by_id(conn: &Connection, session_id: i64) -> Result<SessionRow> {
        conn.query_row(
            "SELECT id, user_id, external_user_ref, bearer_token, token_expiry, created_at,
                    quiz_completed, quiz_analysis_generated, reconciliation_fired_at,
                    settlement_payload, order_id
             FROM sessions WHERE id = ?1",
            params![session_id],
            Self::map_session_row,
        )
        .optional()?
        .ok_or(StoreError::SessionNotFound { session_id })
    }

    fn map_session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            external_user_ref: row.get(2)?,
            bearer_token: row.get(3)?,
            token_expiry: opt_ts(row, 4)?,
            created_at: ts(row, 5)?,
            quiz_completed: row.get(6)?,
            quiz_analysis_generated: row.get(7)?,
            reconciliation_fired_at: opt_ts(row, 8)?,
            settlement_payload: row.get(9)?,
            order_id: row.get(10)?,
        })
    }

    // ========================================================================
    // Reconciliation queries
    // ========================================================================

    /// Counts sessions created inside the half-open age window
    /// (`oldest`, `newest`] that have not been reconciled yet.
    ///
    /// This is the cheap first probe of a reconciliation tick; most ticks see
    /// zero and skip the heavier join in [`Store::stalled_sessions`].
    pub fn count_stalled_in_window(
        &self,
        newest: DateTime<Utc>,
        oldest: DateTime<Utc>,
    ) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions
             WHERE created_at <= ?1
               AND created_at > ?2
               AND reconciliation_fired_at IS NULL",
            params![ts_string(newest), ts_string(oldest)],
            |row| row.get(0),
        )?;
        Ok(count.unsigned_abs())
    }

    /// Sessions inside the window whose first question is absent or
    /// unanswered, joined to the owning user's contact fields.
    pub fn stalled_sessions(
        &self,
        newest: DateTime<Utc>,
        oldest: DateTime<Utc>,
    ) -> Result<Vec<StalledSession>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, u.phone, u.full_name
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             LEFT JOIN questions q ON q.session_id = s.id AND q.question_no = 1
             WHERE s.created_at <= ?1
               AND s.created_at > ?2
               AND s.reconciliation_fired_at IS NULL
               AND (q.id IS NULL OR q.answered = 0)
             ORDER BY s.id",
        )?;
        let rows = stmt.query_map(params![ts_string(newest), ts_string(oldest)], |row| {
            Ok(StalledSession {
                session_id: row.get(0)?,
                phone: row.get(1)?,
                full_name: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ========================================================================
    // Test support
    // ========================================================================

    /// Runs a raw statement against the connection. Test-only escape hatch
    /// for simulating external writers (e.g. a concurrent session delete).
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<usize> {
        let conn = self.lock();
        Ok(conn.execute(sql, [])?)
    }
}

/// Fixed-width RFC 3339 timestamp for the current instant.
///
/// All timestamps are written through this (or [`ts_string`]) so that string
/// comparison in SQL agrees with chronological order.
pub(crate) fn now_string() -> String {
    ts_string(Utc::now())
}

pub(crate) fn ts_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw, idx)
}

pub(crate) fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| parse_ts(&value, idx)).transpose()
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
