#![forbid(unsafe_code)]

mod audit;
mod error;
mod members;
mod points;
mod ranks;
mod requests;
mod types;

pub use error::StoreError;
pub use requests::*;
pub use types::*;

use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE_NAME: &str = "points_ledger.db";
const SCHEMA_VERSION: i64 = 1;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LIST_LIMIT: usize = 1_000;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_busy_timeout(storage_dir, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(
        storage_dir: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA foreign_keys = ON;",
        )?;

        preflight_gate(&conn)?;
        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join(DB_FILE_NAME)
    }

    /// Makes every write on this connection fail with `SQLITE_READONLY`.
    #[cfg(test)]
    pub(crate) fn set_query_only(&self, on: bool) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "query_only", on)?;
        Ok(())
    }
}

fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = [
        "store_state",
        "ranks",
        "members",
        "points_history",
        "audit_log",
    ]
    .into_iter()
    .collect();

    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }

    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    let now_ms = now_ms();

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ranks (
          name TEXT PRIMARY KEY,
          sequence INTEGER NOT NULL UNIQUE,
          threshold_points INTEGER NOT NULL CHECK(threshold_points >= 0),
          parent TEXT,
          kind TEXT NOT NULL CHECK(kind IN ('leaf', 'category')),
          manual_only INTEGER NOT NULL DEFAULT 0 CHECK(manual_only IN (0, 1)),
          FOREIGN KEY(parent) REFERENCES ranks(name) DEFERRABLE INITIALLY DEFERRED,
          CHECK(parent IS NULL OR parent <> name)
        );

        CREATE TABLE IF NOT EXISTS members (
          id TEXT PRIMARY KEY,
          display_name TEXT,
          points INTEGER NOT NULL DEFAULT 0 CHECK(points >= 0),
          rank_name TEXT,
          revision INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          FOREIGN KEY(rank_name) REFERENCES ranks(name) DEFERRABLE INITIALLY DEFERRED
        );

        CREATE INDEX IF NOT EXISTS idx_members_points
          ON members(points DESC, id ASC);

        CREATE TABLE IF NOT EXISTS points_history (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          member_id TEXT NOT NULL,
          change INTEGER NOT NULL,
          requested INTEGER NOT NULL,
          reason TEXT NOT NULL,
          related_task_id TEXT,
          related_donation_id TEXT,
          balance_after INTEGER NOT NULL CHECK(balance_after >= 0),
          created_at_ms INTEGER NOT NULL,
          FOREIGN KEY(member_id) REFERENCES members(id) ON DELETE RESTRICT,
          CHECK(related_task_id IS NULL OR related_donation_id IS NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_points_history_member_seq
          ON points_history(member_id, seq);

        CREATE TRIGGER IF NOT EXISTS points_history_no_update
          BEFORE UPDATE ON points_history
        BEGIN
          SELECT RAISE(ABORT, 'points_history is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS points_history_no_delete
          BEFORE DELETE ON points_history
        BEGIN
          SELECT RAISE(ABORT, 'points_history is append-only');
        END;

        CREATE TABLE IF NOT EXISTS audit_log (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          actor_id TEXT,
          action TEXT NOT NULL,
          meta_json TEXT NOT NULL,
          points INTEGER,
          created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_action_seq
          ON audit_log(action, seq);

        CREATE TRIGGER IF NOT EXISTS audit_log_no_update
          BEFORE UPDATE ON audit_log
        BEGIN
          SELECT RAISE(ABORT, 'audit_log is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
          BEFORE DELETE ON audit_log
        BEGIN
          SELECT RAISE(ABORT, 'audit_log is append-only');
        END;
        "#,
    )?;

    conn.execute(
        "INSERT INTO store_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version",
        params![SCHEMA_VERSION, now_ms],
    )?;

    Ok(())
}

#[derive(Debug)]
struct MemberState {
    points: i64,
    rank_name: Option<String>,
}

fn member_state_tx(tx: &Transaction<'_>, member_id: &str) -> Result<MemberState, StoreError> {
    let value = tx
        .query_row(
            "SELECT points, rank_name FROM members WHERE id=?1",
            params![member_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;

    match value {
        Some((points, rank_name)) => Ok(MemberState { points, rank_name }),
        None => Err(StoreError::UnknownMember),
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn to_sqlite_limit(value: usize) -> Result<i64, StoreError> {
    if value == 0 {
        return Err(StoreError::InvalidInput("limit must be positive"));
    }
    i64::try_from(value.min(MAX_LIST_LIMIT))
        .map_err(|_| StoreError::InvalidInput("numeric overflow"))
}

fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
