#![forbid(unsafe_code)]

use super::*;
use pl_core::{RankKind, RankLadder, RankSpec};

impl SqliteStore {
    /// Replaces the stored ladder and re-resolves every member against it in
    /// the same transaction, so no member is left on a removed or stale rank.
    pub fn install_rank_ladder(
        &mut self,
        ladder: &RankLadder,
    ) -> Result<LadderInstall, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM ranks", [])?;
        for rank in ladder.ranks() {
            tx.execute(
                "INSERT INTO ranks(name, sequence, threshold_points, parent, kind, manual_only) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    rank.name,
                    to_sqlite_i64(rank.sequence)?,
                    rank.threshold_points,
                    rank.parent,
                    rank.kind.as_str(),
                    rank.manual_only,
                ],
            )?;
        }

        let members = {
            let mut stmt = tx.prepare(
                "SELECT id, points, rank_name, revision FROM members ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let now_ms = now_ms();
        let mut members_reranked = 0usize;
        for (member_id, points, rank_name, revision) in members {
            // A member who never received a ledger change keeps no rank.
            if revision == 0 {
                continue;
            }
            let resolved = ladder
                .reresolve(points, rank_name.as_deref())
                .map(|rank| rank.name.clone());
            if resolved == rank_name {
                continue;
            }
            tx.execute(
                "UPDATE members SET rank_name=?2, revision=revision+1, updated_at_ms=?3 WHERE id=?1",
                params![member_id, resolved, now_ms],
            )?;
            members_reranked += 1;
        }

        tx.commit()?;
        Ok(LadderInstall {
            ranks: ladder.ranks().len(),
            members_reranked,
        })
    }

    pub fn load_rank_ladder(&self) -> Result<Option<RankLadder>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, threshold_points, parent, kind, manual_only \
             FROM ranks ORDER BY sequence ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut specs = Vec::new();
        while let Some(row) = rows.next()? {
            let kind = row.get::<_, String>(3)?;
            let kind = RankKind::parse(&kind)
                .ok_or(StoreError::InvalidInput("invalid rank kind row"))?;
            specs.push(RankSpec {
                name: row.get(0)?,
                threshold_points: row.get(1)?,
                parent: row.get(2)?,
                kind,
                manual_only: row.get(4)?,
            });
        }

        if specs.is_empty() {
            return Ok(None);
        }
        Ok(Some(RankLadder::try_new(specs)?))
    }
}
