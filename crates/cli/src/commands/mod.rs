#![forbid(unsafe_code)]

pub mod ladder;
pub mod members;
pub mod points;
pub mod reports;

use anyhow::{Context as _, Result};
use pl_core::ids::MemberId;
use pl_storage::{LedgerConfig, PointsLedger, SqliteStore};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Global options shared by every subcommand.
pub struct Context {
    storage_dir: PathBuf,
    busy_timeout: Duration,
    json: bool,
}

impl Context {
    pub fn new(storage_dir: PathBuf, busy_timeout_ms: u64, json: bool) -> Self {
        Self {
            storage_dir,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            json,
        }
    }

    fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            busy_timeout: self.busy_timeout,
            ..LedgerConfig::new(&self.storage_dir)
        }
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open_with_busy_timeout(&self.storage_dir, self.busy_timeout)
            .with_context(|| format!("failed to open store at {}", self.storage_dir.display()))
    }

    pub fn open_ledger(&self) -> Result<PointsLedger> {
        PointsLedger::open(self.ledger_config())
            .with_context(|| format!("failed to open ledger at {}", self.storage_dir.display()))
    }

    /// Prints `value` as pretty JSON under `--json`, otherwise the human
    /// rendering.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human(value));
        }
        Ok(())
    }
}

pub fn member_id(raw: &str) -> Result<MemberId> {
    MemberId::try_new(raw.trim()).with_context(|| format!("invalid member id {raw:?}"))
}
