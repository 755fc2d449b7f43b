#![forbid(unsafe_code)]

use super::*;
use pl_core::NewAuditEntry;
use rusqlite::types::Value;

fn read_audit_row(row: &rusqlite::Row<'_>) -> Result<(AuditRow, String), rusqlite::Error> {
    Ok((
        AuditRow {
            seq: row.get(0)?,
            actor_id: row.get(1)?,
            action: row.get(2)?,
            meta: serde_json::Value::Null,
            points: row.get(4)?,
            created_at_ms: row.get(5)?,
        },
        row.get(3)?,
    ))
}

impl SqliteStore {
    pub fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditRow, StoreError> {
        let meta_json = serde_json::to_string(&entry.meta)
            .map_err(|_| StoreError::InvalidInput("audit meta is not serializable"))?;
        let actor_id = entry.actor_id.map(String::from);
        let now_ms = now_ms();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO audit_log(actor_id, action, meta_json, points, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                actor_id,
                entry.action.as_str(),
                meta_json,
                entry.points,
                now_ms
            ],
        )?;
        let seq = tx.last_insert_rowid();
        tx.commit()?;

        Ok(AuditRow {
            seq,
            actor_id,
            action: entry.action.as_str().to_string(),
            meta: entry.meta,
            points: entry.points,
            created_at_ms: now_ms,
        })
    }

    /// Most recent entries first, optionally filtered by action and actor.
    pub fn list_audit(&self, request: ListAuditRequest) -> Result<Vec<AuditRow>, StoreError> {
        let limit = to_sqlite_limit(request.limit)?;

        let mut sql = String::from(
            "SELECT seq, actor_id, action, meta_json, points, created_at_ms FROM audit_log WHERE 1=1",
        );
        let mut binds: Vec<Value> = Vec::new();
        if let Some(action) = request.action {
            binds.push(Value::Text(action.as_str().to_string()));
            sql.push_str(&format!(" AND action=?{}", binds.len()));
        }
        if let Some(actor_id) = request.actor_id {
            binds.push(Value::Text(actor_id));
            sql.push_str(&format!(" AND actor_id=?{}", binds.len()));
        }
        binds.push(Value::Integer(limit));
        sql.push_str(&format!(" ORDER BY seq DESC LIMIT ?{}", binds.len()));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(binds), read_audit_row)?;

        let mut out = Vec::new();
        for row in rows {
            let (mut audit, meta_json) = row?;
            audit.meta = serde_json::from_str(&meta_json)
                .map_err(|_| StoreError::InvalidInput("invalid audit meta row"))?;
            out.push(audit);
        }
        Ok(out)
    }
}
