#![forbid(unsafe_code)]

use super::{Context, member_id};
use crate::support::{rank_label, signed, ts_ms_to_rfc3339};
use anyhow::Result;
use pl_storage::{CreateMemberRequest, ListMembersRequest, MemberOverview, MemberRow};
use std::fmt::Write as _;

pub fn add(ctx: &Context, id: &str, name: Option<String>) -> Result<()> {
    let mut store = ctx.open_store()?;
    let row = store.create_member(CreateMemberRequest {
        member_id: id.trim().to_string(),
        display_name: name,
    })?;
    ctx.emit(&row, |row| format!("added member {}", row.id))
}

pub fn show(ctx: &Context, id: &str, limit: usize) -> Result<()> {
    let member_id = member_id(id)?;
    let ledger = ctx.open_ledger()?;
    let overview = ledger.overview(&member_id, limit)?;
    ctx.emit(&overview, render_overview)
}

pub fn list(ctx: &Context, limit: usize, offset: usize) -> Result<()> {
    let store = ctx.open_store()?;
    let rows = store.list_members(ListMembersRequest { limit, offset })?;
    ctx.emit(&rows, |rows| {
        rows.iter().map(render_row).collect::<Vec<_>>().join("\n")
    })
}

pub(crate) fn render_row(row: &MemberRow) -> String {
    let name = row.display_name.as_deref().unwrap_or("");
    format!(
        "{:<24} {:<24} {:>8}  {}",
        row.id,
        name,
        row.points,
        rank_label(row.rank_name.as_deref())
    )
}

fn render_overview(overview: &MemberOverview) -> String {
    let member = &overview.member;
    let mut out = String::new();
    let _ = write!(out, "{}", member.id);
    if let Some(name) = member.display_name.as_deref() {
        let _ = write!(out, " ({name})");
    }
    let _ = writeln!(
        out,
        "\n  points: {}\n  rank:   {}",
        member.points,
        rank_label(member.rank_name.as_deref())
    );
    match (&overview.next_rank, overview.points_to_next) {
        (Some(next), Some(remaining)) => {
            let _ = writeln!(out, "  next:   {} in {remaining} points", next.name);
        }
        _ => {
            let _ = writeln!(out, "  next:   top of the ladder");
        }
    }
    if !overview.history.is_empty() {
        let _ = writeln!(out, "  history:");
    }
    for entry in &overview.history {
        let clamped = if entry.change != entry.requested {
            format!(" (requested {})", signed(entry.requested))
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "    #{:<6} {}  {:>7}{clamped} -> {:<7} {}",
            entry.seq,
            ts_ms_to_rfc3339(entry.created_at_ms),
            signed(entry.change),
            entry.balance_after,
            entry.reason
        );
    }
    out.trim_end().to_string()
}
