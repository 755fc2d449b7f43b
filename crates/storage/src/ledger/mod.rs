#![forbid(unsafe_code)]

//! The points ledger engine: the single mutation path for member balances.
//!
//! Every point-changing event (task approval, administrative adjustment,
//! donation credit, deadline-miss deduction) goes through
//! [`PointsLedger::apply_points_change`]. Each call is one atomic store unit,
//! serialized per member. The engine does not write audit rows or send
//! notifications; callers do that after it returns (see [`crate::flows`]).

mod locks;
mod pool;

use crate::store::{
    CreateMemberRequest, LadderInstall, MemberRow, PointsHistoryRow, RankPromotion, SqliteStore,
    StoreError,
};
use locks::MemberLocks;
use pl_core::ids::MemberId;
use pl_core::{
    InputError, NewAuditEntry, PointsChange, PointsOutcome, Rank, RankLadder, RelatedEntity,
};
use pool::StorePool;
use rusqlite::ErrorCode;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    pub storage_dir: PathBuf,
    pub pool_size: usize,
    pub busy_timeout: Duration,
}

impl LedgerConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("member {member_id} not found")]
    NotFound { member_id: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[source] StoreError),
    /// The ledger change was committed but the caller's audit row was not.
    #[error("ledger change applied but audit write failed: {0}")]
    AuditWriteFailed(#[source] StoreError),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::PersistenceFailure(_) | Self::AuditWriteFailed(_) => {
                "PERSISTENCE_FAILURE"
            }
        }
    }

    /// Conditions that mean the store itself is unusable. A batch stops on
    /// these instead of reporting them per target.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::PersistenceFailure(err) | Self::AuditWriteFailed(err) => store_is_unusable(err),
            _ => false,
        }
    }

    fn from_store(err: StoreError, member_id: &MemberId) -> Self {
        match err {
            StoreError::UnknownMember => Self::NotFound {
                member_id: member_id.as_str().to_string(),
            },
            StoreError::UnknownRank => Self::InvalidInput("unknown rank".to_string()),
            StoreError::MemberAlreadyExists => {
                Self::InvalidInput(format!("member {member_id} already exists"))
            }
            StoreError::InvalidInput(message) => Self::InvalidInput(message.to_string()),
            StoreError::Input(err) => Self::InvalidInput(err.to_string()),
            StoreError::MemberId(err) => Self::InvalidInput(err.to_string()),
            other => Self::PersistenceFailure(other),
        }
    }
}

fn store_is_unusable(err: &StoreError) -> bool {
    match err {
        StoreError::Io(_) => true,
        StoreError::Sql(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::PermissionDenied
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
        ),
        _ => false,
    }
}

impl From<InputError> for LedgerError {
    fn from(value: InputError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

/// Per-target result inside a batch. Failures are data, not errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Applied(PointsOutcome),
    Failed {
        member_id: String,
        error_code: String,
        message: String,
    },
}

impl TargetOutcome {
    pub fn member_id(&self) -> &str {
        match self {
            TargetOutcome::Applied(outcome) => outcome.member_id.as_str(),
            TargetOutcome::Failed { member_id, .. } => member_id,
        }
    }

    pub fn applied(&self) -> Option<&PointsOutcome> {
        match self {
            TargetOutcome::Applied(outcome) => Some(outcome),
            TargetOutcome::Failed { .. } => None,
        }
    }
}

/// A batch step that failed outside the per-target engine call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchIssue {
    /// `None` for the batch's own summary row.
    pub member_id: Option<String>,
    pub error_code: String,
    pub message: String,
}

impl BatchIssue {
    fn new(member_id: Option<&str>, err: &LedgerError) -> Self {
        Self {
            member_id: member_id.map(str::to_string),
            error_code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<TargetOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    /// Fatal store error that stopped the batch. Targets after it were not
    /// attempted; the ones in `results` stay committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<BatchIssue>,
    /// Audit rows that could not be written for changes that were applied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub audit_failures: Vec<BatchIssue>,
}

impl BatchOutcome {
    pub(crate) fn push(&mut self, outcome: TargetOutcome) {
        match outcome {
            TargetOutcome::Applied(_) => self.succeeded += 1,
            TargetOutcome::Failed { .. } => self.failed += 1,
        }
        self.results.push(outcome);
    }

    pub(crate) fn abort(&mut self, member_id: &str, err: &LedgerError) {
        self.aborted = Some(BatchIssue::new(Some(member_id), err));
    }

    pub(crate) fn audit_failed(&mut self, member_id: Option<&str>, err: &LedgerError) {
        self.audit_failures.push(BatchIssue::new(member_id, err));
    }
}

/// Validates a batch, then runs `apply` once per distinct target. A fatal
/// error stops the loop and is recorded in [`BatchOutcome::aborted`].
pub(crate) fn run_batch(
    batch: &BatchAdjustment,
    mut apply: impl FnMut(&str) -> Result<TargetOutcome, LedgerError>,
) -> Result<BatchOutcome, LedgerError> {
    if batch.delta == 0 {
        return Err(InputError::ZeroDelta.into());
    }
    if batch.reason.trim().is_empty() {
        return Err(InputError::EmptyReason.into());
    }

    let mut seen = BTreeSet::new();
    let mut outcome = BatchOutcome::default();
    for raw in &batch.member_ids {
        if !seen.insert(raw.trim()) {
            continue;
        }
        match apply(raw) {
            Ok(target) => outcome.push(target),
            Err(err) => {
                outcome.abort(raw, &err);
                break;
            }
        }
    }
    info!(
        targets = outcome.results.len(),
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        aborted = outcome.aborted.is_some(),
        "batch adjustment finished"
    );
    Ok(outcome)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchAdjustment {
    pub member_ids: Vec<String>,
    pub delta: i64,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberOverview {
    pub member: MemberRow,
    pub history: Vec<PointsHistoryRow>,
    pub ladder: Vec<Rank>,
    pub next_rank: Option<Rank>,
    pub points_to_next: Option<i64>,
}

#[derive(Debug)]
pub struct PointsLedger {
    ladder: Arc<RankLadder>,
    pool: StorePool,
    locks: MemberLocks,
}

impl PointsLedger {
    /// Opens the ledger over an existing store. The rank ladder is read once
    /// here and stays fixed for the ledger's lifetime.
    pub fn open(config: LedgerConfig) -> Result<Self, LedgerError> {
        let store = SqliteStore::open_with_busy_timeout(&config.storage_dir, config.busy_timeout)
            .map_err(LedgerError::PersistenceFailure)?;
        let ladder = store
            .load_rank_ladder()
            .map_err(LedgerError::PersistenceFailure)?
            .ok_or_else(|| LedgerError::InvalidInput("rank ladder is not installed".to_string()))?;
        info!(
            storage_dir = %config.storage_dir.display(),
            ranks = ladder.ranks().len(),
            "points ledger opened"
        );
        Ok(Self {
            ladder: Arc::new(ladder),
            pool: StorePool::new(config.storage_dir, config.busy_timeout, config.pool_size, store),
            locks: MemberLocks::default(),
        })
    }

    /// Installs `ladder` into the store, then opens the ledger over it.
    pub fn open_with_ladder(
        config: LedgerConfig,
        ladder: &RankLadder,
    ) -> Result<(Self, LadderInstall), LedgerError> {
        let mut store =
            SqliteStore::open_with_busy_timeout(&config.storage_dir, config.busy_timeout)
                .map_err(LedgerError::PersistenceFailure)?;
        let install = store
            .install_rank_ladder(ladder)
            .map_err(LedgerError::PersistenceFailure)?;
        drop(store);
        Ok((Self::open(config)?, install))
    }

    pub fn ladder(&self) -> &RankLadder {
        &self.ladder
    }

    /// Applies one signed delta to one member: clamp at zero, persist,
    /// append history, re-resolve rank. Not idempotent.
    pub fn apply_points_change(
        &self,
        member_id: &MemberId,
        delta: i64,
        reason: &str,
        related: Option<RelatedEntity>,
    ) -> Result<PointsOutcome, LedgerError> {
        let change = PointsChange::new(member_id.clone(), delta, reason, related)?;
        self.apply(&change)
    }

    pub fn apply(&self, change: &PointsChange) -> Result<PointsOutcome, LedgerError> {
        change.validate()?;
        let member_id = &change.member_id;

        let result = self.locks.with_member(member_id, || {
            debug!(member_id = %member_id, "member lock acquired");
            let mut store = self.pool.checkout()?;
            store.apply_points_change(&self.ladder, change)
        });

        let outcome = result.map_err(|err| LedgerError::from_store(err, member_id))?;
        info!(
            member_id = %member_id,
            requested = outcome.requested_delta,
            applied = outcome.applied_delta,
            new_points = outcome.new_points,
            history_seq = outcome.history_seq,
            "points change applied"
        );
        if outcome.rank_changed {
            info!(
                member_id = %member_id,
                old_rank = outcome.old_rank.as_deref().unwrap_or("-"),
                new_rank = outcome.new_rank.as_deref().unwrap_or("-"),
                "rank changed"
            );
        }
        Ok(outcome)
    }

    /// Applies one change to one batch target. Per-target problems come back
    /// as [`TargetOutcome::Failed`]; only fatal store errors are returned as
    /// `Err`.
    pub fn apply_target(
        &self,
        raw_member_id: &str,
        delta: i64,
        reason: &str,
        related: Option<RelatedEntity>,
    ) -> Result<TargetOutcome, LedgerError> {
        let attempt = MemberId::try_new(raw_member_id.trim())
            .map_err(|err| LedgerError::InvalidInput(err.to_string()))
            .and_then(|member_id| self.apply_points_change(&member_id, delta, reason, related));

        match attempt {
            Ok(outcome) => Ok(TargetOutcome::Applied(outcome)),
            Err(err) if err.is_fatal() => {
                error!(member_id = raw_member_id, error = %err, "fatal ledger failure");
                Err(err)
            }
            Err(err) => {
                warn!(member_id = raw_member_id, code = err.code(), error = %err, "batch target failed");
                Ok(TargetOutcome::Failed {
                    member_id: raw_member_id.to_string(),
                    error_code: err.code().to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Applies the same delta to every listed member independently. A failure
    /// on one target does not stop the others; a fatal store error stops the
    /// batch and is reported with the targets already applied. Repeated ids
    /// are applied once.
    pub fn apply_batch(&self, batch: &BatchAdjustment) -> Result<BatchOutcome, LedgerError> {
        run_batch(batch, |raw| {
            self.apply_target(raw, batch.delta, &batch.reason, None)
        })
    }

    /// Explicit administrative rank assignment, serialized with the member's
    /// ledger mutations.
    pub fn promote_rank(
        &self,
        member_id: &MemberId,
        rank_name: &str,
    ) -> Result<RankPromotion, LedgerError> {
        let result = self.locks.with_member(member_id, || {
            let mut store = self.pool.checkout()?;
            store.promote_member_rank(&self.ladder, member_id, rank_name)
        });
        let promotion = result.map_err(|err| LedgerError::from_store(err, member_id))?;
        info!(
            member_id = %member_id,
            old_rank = promotion.old_rank.as_deref().unwrap_or("-"),
            new_rank = %promotion.new_rank,
            "rank promoted"
        );
        Ok(promotion)
    }

    /// Read-only view for progress displays: member, recent history, the
    /// assignable ladder and the next rank.
    pub fn overview(&self, member_id: &MemberId, limit: usize) -> Result<MemberOverview, LedgerError> {
        let (member, history) = {
            let mut store = self.checkout()?;
            store
                .member_snapshot(member_id, limit)
                .map_err(|err| LedgerError::from_store(err, member_id))?
        };
        let next_rank = self.ladder.next_rank(member.rank_name.as_deref()).cloned();
        let points_to_next = self
            .ladder
            .points_to_next(member.points, member.rank_name.as_deref());
        Ok(MemberOverview {
            ladder: self.ladder.assignable().cloned().collect(),
            member,
            history,
            next_rank,
            points_to_next,
        })
    }

    pub fn create_member(
        &self,
        member_id: &MemberId,
        display_name: Option<String>,
    ) -> Result<MemberRow, LedgerError> {
        let mut store = self.checkout()?;
        let row = store
            .create_member(CreateMemberRequest {
                member_id: member_id.as_str().to_string(),
                display_name,
            })
            .map_err(|err| LedgerError::from_store(err, member_id))?;
        info!(member_id = %member_id, "member created");
        Ok(row)
    }

    pub fn leaderboard(&self, limit: usize) -> Result<Vec<MemberRow>, LedgerError> {
        let store = self.checkout()?;
        store.leaderboard(limit).map_err(LedgerError::PersistenceFailure)
    }

    /// Caller-side audit write. The engine never calls this itself.
    pub fn record_audit(&self, entry: NewAuditEntry) -> Result<i64, LedgerError> {
        let mut store = self.checkout()?;
        let row = store
            .append_audit(entry)
            .map_err(LedgerError::AuditWriteFailed)?;
        Ok(row.seq)
    }

    /// Direct store access for reads and member administration.
    pub fn with_store<T>(
        &self,
        f: impl FnOnce(&mut SqliteStore) -> Result<T, StoreError>,
    ) -> Result<T, LedgerError> {
        let mut store = self.checkout()?;
        f(&mut store).map_err(LedgerError::PersistenceFailure)
    }

    fn checkout(&self) -> Result<pool::PooledStore<'_>, LedgerError> {
        self.pool.checkout().map_err(LedgerError::PersistenceFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LADDER_YAML: &str = "\
ranks:
  - name: Newcomer
  - name: Regular
    threshold_points: 100
";

    fn member(id: &str) -> MemberId {
        MemberId::try_new(id).expect("member id")
    }

    #[test]
    fn error_codes_follow_taxonomy() {
        let not_found = LedgerError::NotFound {
            member_id: "m1".to_string(),
        };
        assert_eq!(not_found.code(), "NOT_FOUND");
        assert!(!not_found.is_fatal());

        let invalid: LedgerError = InputError::ZeroDelta.into();
        assert_eq!(invalid.code(), "INVALID_INPUT");

        let io = LedgerError::PersistenceFailure(StoreError::Io(std::io::Error::other("gone")));
        assert_eq!(io.code(), "PERSISTENCE_FAILURE");
        assert!(io.is_fatal());

        let busy = LedgerError::PersistenceFailure(StoreError::Sql(
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            ),
        ));
        assert_eq!(busy.code(), "PERSISTENCE_FAILURE");
        assert!(!busy.is_fatal(), "a busy target is a per-target failure");

        let full_disk = LedgerError::AuditWriteFailed(StoreError::Sql(
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                None,
            ),
        ));
        assert_eq!(full_disk.code(), "PERSISTENCE_FAILURE");
        assert!(full_disk.is_fatal());
    }

    #[test]
    fn store_errors_map_to_ledger_errors() {
        let member = MemberId::try_new("m9").expect("member id");
        assert!(matches!(
            LedgerError::from_store(StoreError::UnknownMember, &member),
            LedgerError::NotFound { member_id } if member_id == "m9"
        ));
        assert!(matches!(
            LedgerError::from_store(StoreError::InvalidInput("bad"), &member),
            LedgerError::InvalidInput(message) if message == "bad"
        ));
        assert!(matches!(
            LedgerError::from_store(StoreError::UnknownRank, &member),
            LedgerError::InvalidInput(_)
        ));
    }

    #[test]
    fn fatal_target_stops_the_batch_and_keeps_applied_targets() {
        let dir = TempDir::new().expect("temp dir");
        let ladder = RankLadder::from_yaml_str(LADDER_YAML).expect("ladder");
        let (ledger, _) =
            PointsLedger::open_with_ladder(LedgerConfig::new(dir.path()), &ladder).expect("open");
        for id in ["m1", "m2", "m3"] {
            ledger.create_member(&member(id), None).expect("create member");
        }
        let batch = BatchAdjustment {
            member_ids: vec!["m1".into(), "m2".into(), "m3".into()],
            delta: 15,
            reason: "cleanup crew".to_string(),
        };

        let outcome = run_batch(&batch, |raw| {
            if raw == "m2" {
                ledger.with_store(|store| store.set_query_only(true))?;
            }
            ledger.apply_target(raw, batch.delta, &batch.reason, None)
        })
        .expect("partial outcome");
        ledger
            .with_store(|store| store.set_query_only(false))
            .expect("writable again");

        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].member_id(), "m1");
        let aborted = outcome.aborted.expect("batch aborted");
        assert_eq!(aborted.member_id.as_deref(), Some("m2"));
        assert_eq!(aborted.error_code, "PERSISTENCE_FAILURE");

        for (id, points) in [("m1", 15), ("m2", 0), ("m3", 0)] {
            let row = ledger
                .with_store(|store| store.get_member(&member(id)))
                .expect("get member")
                .expect("member exists");
            assert_eq!(row.points, points, "{id}");
        }
    }
}
