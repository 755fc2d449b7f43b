#![forbid(unsafe_code)]

use super::*;
use pl_core::ids::MemberId;
use pl_core::{PointsChange, PointsOutcome, RankLadder, clamp_change};
use rusqlite::TransactionBehavior;

const HISTORY_COLUMNS: &str = "seq, member_id, change, requested, reason, related_task_id, \
     related_donation_id, balance_after, created_at_ms";

fn read_history_row(row: &rusqlite::Row<'_>) -> Result<PointsHistoryRow, rusqlite::Error> {
    Ok(PointsHistoryRow {
        seq: row.get(0)?,
        member_id: row.get(1)?,
        change: row.get(2)?,
        requested: row.get(3)?,
        reason: row.get(4)?,
        related_task_id: row.get(5)?,
        related_donation_id: row.get(6)?,
        balance_after: row.get(7)?,
        created_at_ms: row.get(8)?,
    })
}

impl SqliteStore {
    /// The ledger's atomic unit: read the balance, clamp at zero, persist the
    /// new balance, append the history row and re-resolve the rank. All of it
    /// commits together or not at all.
    ///
    /// The transaction is opened `IMMEDIATE` so the write lock is taken
    /// before the balance is read; a concurrent writer on the same database
    /// waits (up to the busy timeout) instead of racing the read.
    pub fn apply_points_change(
        &mut self,
        ladder: &RankLadder,
        change: &PointsChange,
    ) -> Result<PointsOutcome, StoreError> {
        change.validate()?;
        let member_id = change.member_id.as_str();
        let now_ms = now_ms();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let state = member_state_tx(&tx, member_id)?;

        let step = clamp_change(state.points, change.delta);
        let new_rank = ladder
            .reresolve(step.new_points, state.rank_name.as_deref())
            .map(|rank| rank.name.clone());
        let rank_changed = new_rank != state.rank_name;

        tx.execute(
            "UPDATE members SET points=?2, revision=revision+1, updated_at_ms=?3 WHERE id=?1",
            params![member_id, step.new_points, now_ms],
        )?;
        if rank_changed {
            tx.execute(
                "UPDATE members SET rank_name=?2 WHERE id=?1",
                params![member_id, new_rank],
            )?;
        }

        let related = change.related.as_ref();
        tx.execute(
            "INSERT INTO points_history(member_id, change, requested, reason, related_task_id, \
             related_donation_id, balance_after, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                member_id,
                step.applied,
                change.delta,
                change.reason.trim(),
                related.and_then(|entity| entity.task_id()),
                related.and_then(|entity| entity.donation_id()),
                step.new_points,
                now_ms,
            ],
        )?;
        let history_seq = tx.last_insert_rowid();

        tx.commit()?;
        Ok(PointsOutcome {
            member_id: change.member_id.clone(),
            new_points: step.new_points,
            applied_delta: step.applied,
            requested_delta: change.delta,
            rank_changed,
            old_rank: state.rank_name,
            new_rank,
            history_seq,
        })
    }

    /// Administrative assignment of a manual-only capstone, which resolution
    /// never produces. The member must already hold the capstone's threshold.
    pub fn promote_member_rank(
        &mut self,
        ladder: &RankLadder,
        member_id: &MemberId,
        rank_name: &str,
    ) -> Result<RankPromotion, StoreError> {
        let rank = ladder.get(rank_name.trim()).ok_or(StoreError::UnknownRank)?;
        if !rank.is_assignable() {
            return Err(StoreError::InvalidInput(
                "category ranks cannot be assigned to members",
            ));
        }
        if !rank.manual_only {
            return Err(StoreError::InvalidInput(
                "only manual-only ranks can be assigned explicitly",
            ));
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let state = member_state_tx(&tx, member_id.as_str())?;
        if state.points < rank.threshold_points {
            return Err(StoreError::InvalidInput(
                "member points are below the rank threshold",
            ));
        }
        tx.execute(
            "UPDATE members SET rank_name=?2, revision=revision+1, updated_at_ms=?3 WHERE id=?1",
            params![member_id.as_str(), rank.name, now_ms()],
        )?;
        tx.commit()?;

        Ok(RankPromotion {
            member_id: member_id.as_str().to_string(),
            old_rank: state.rank_name,
            new_rank: rank.name.clone(),
            points: state.points,
        })
    }

    /// Most recent entries first.
    pub fn list_points_history(
        &self,
        member_id: &MemberId,
        limit: usize,
    ) -> Result<Vec<PointsHistoryRow>, StoreError> {
        if !self.member_exists(member_id)? {
            return Err(StoreError::UnknownMember);
        }
        let limit = to_sqlite_limit(limit)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM points_history \
             WHERE member_id=?1 ORDER BY seq DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![member_id.as_str(), limit], read_history_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Member row and recent history read from one snapshot.
    pub fn member_snapshot(
        &mut self,
        member_id: &MemberId,
        limit: usize,
    ) -> Result<(MemberRow, Vec<PointsHistoryRow>), StoreError> {
        let limit = to_sqlite_limit(limit)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;

        let member = tx
            .query_row(
                &format!("SELECT {} FROM members WHERE id=?1", members::MEMBER_COLUMNS),
                params![member_id.as_str()],
                members::read_member_row,
            )
            .optional()?
            .ok_or(StoreError::UnknownMember)?;

        let history = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM points_history \
                 WHERE member_id=?1 ORDER BY seq DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![member_id.as_str(), limit], read_history_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        tx.commit()?;
        Ok((member, history))
    }

    /// Sum of applied changes; equals the member's balance when the history
    /// is complete.
    pub fn points_history_sum(&self, member_id: &MemberId) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(SUM(change), 0) FROM points_history WHERE member_id=?1",
            params![member_id.as_str()],
            |row| row.get::<_, i64>(0),
        )?)
    }

    pub fn count_history(&self, member_id: &MemberId) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(1) FROM points_history WHERE member_id=?1",
            params![member_id.as_str()],
            |row| row.get::<_, i64>(0),
        )?)
    }

    /// Awards that count as submissions: positive changes that were not
    /// written by the deadline sweep.
    pub fn count_submissions(&self, member_id: &MemberId) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(1) FROM points_history \
             WHERE member_id=?1 AND requested > 0 AND substr(reason, 1, ?2) <> ?3",
            params![
                member_id.as_str(),
                to_sqlite_i64(pl_core::DEADLINE_MISS_MARKER.len())?,
                pl_core::DEADLINE_MISS_MARKER,
            ],
            |row| row.get::<_, i64>(0),
        )?)
    }
}
