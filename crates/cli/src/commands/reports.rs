#![forbid(unsafe_code)]

use super::Context;
use super::members::render_row;
use crate::support::ts_ms_to_rfc3339;
use anyhow::Result;
use pl_core::AuditAction;
use pl_storage::ListAuditRequest;

pub fn leaderboard(ctx: &Context, limit: usize) -> Result<()> {
    let store = ctx.open_store()?;
    let rows = store.leaderboard(limit)?;
    ctx.emit(&rows, |rows| {
        rows.iter()
            .enumerate()
            .map(|(pos, row)| format!("{:>3}. {}", pos + 1, render_row(row)))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub fn audit(
    ctx: &Context,
    limit: usize,
    action: Option<&str>,
    actor_id: Option<String>,
) -> Result<()> {
    let action = match action {
        Some(raw) => Some(
            AuditAction::parse(raw).ok_or_else(|| anyhow::anyhow!("unknown audit action {raw:?}"))?,
        ),
        None => None,
    };
    let store = ctx.open_store()?;
    let rows = store.list_audit(ListAuditRequest {
        limit,
        action,
        actor_id,
    })?;
    ctx.emit(&rows, |rows| {
        rows.iter()
            .map(|row| {
                format!(
                    "#{:<6} {}  {:<22} {:<16} {}",
                    row.seq,
                    ts_ms_to_rfc3339(row.created_at_ms),
                    row.action,
                    row.actor_id.as_deref().unwrap_or("system"),
                    row.meta
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}
