#![forbid(unsafe_code)]

use super::*;
use pl_core::ids::MemberId;

const MAX_DISPLAY_NAME_LEN: usize = 128;

fn normalize_display_name(raw: Option<String>) -> Result<Option<String>, StoreError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_DISPLAY_NAME_LEN {
        return Err(StoreError::InvalidInput("display_name is too long"));
    }
    Ok(Some(trimmed.to_string()))
}

pub(super) fn read_member_row(row: &rusqlite::Row<'_>) -> Result<MemberRow, rusqlite::Error> {
    Ok(MemberRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        points: row.get(2)?,
        rank_name: row.get(3)?,
        revision: row.get(4)?,
        created_at_ms: row.get(5)?,
        updated_at_ms: row.get(6)?,
    })
}

pub(super) const MEMBER_COLUMNS: &str =
    "id, display_name, points, rank_name, revision, created_at_ms, updated_at_ms";

impl SqliteStore {
    /// Members start at zero points with no rank; the first ledger
    /// mutation resolves their rank.
    pub fn create_member(&mut self, request: CreateMemberRequest) -> Result<MemberRow, StoreError> {
        let member_id = MemberId::try_new(request.member_id)?;
        let display_name = normalize_display_name(request.display_name)?;
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        let insert = tx.execute(
            "INSERT INTO members(id, display_name, points, rank_name, revision, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, 0, NULL, 0, ?3, ?3)",
            params![member_id.as_str(), display_name, now_ms],
        );
        if let Err(err) = insert {
            if is_constraint_violation(&err) {
                return Err(StoreError::MemberAlreadyExists);
            }
            return Err(err.into());
        }
        tx.commit()?;

        Ok(MemberRow {
            id: member_id.as_str().to_string(),
            display_name,
            points: 0,
            rank_name: None,
            revision: 0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }

    pub fn get_member(&self, member_id: &MemberId) -> Result<Option<MemberRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id=?1"),
                params![member_id.as_str()],
                read_member_row,
            )
            .optional()?)
    }

    pub fn member_exists(&self, member_id: &MemberId) -> Result<bool, StoreError> {
        Ok(self.get_member(member_id)?.is_some())
    }

    pub fn list_members(&self, request: ListMembersRequest) -> Result<Vec<MemberRow>, StoreError> {
        let limit = to_sqlite_limit(request.limit)?;
        let offset = to_sqlite_i64(request.offset)?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members ORDER BY id ASC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit, offset], read_member_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Highest balances first; equal balances ordered by member id.
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<MemberRow>, StoreError> {
        let limit = to_sqlite_limit(limit)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members ORDER BY points DESC, id ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], read_member_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
