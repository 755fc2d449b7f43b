#![forbid(unsafe_code)]

use super::Context;
use anyhow::{Context as _, Result};
use pl_core::{RankKind, RankLadder};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

fn read_ladder(file: &Path) -> Result<RankLadder> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let is_json = file
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let ladder = if is_json {
        RankLadder::from_json_str(&raw)
    } else {
        RankLadder::from_yaml_str(&raw)
    };
    ladder.with_context(|| format!("invalid rank ladder in {}", file.display()))
}

pub fn install(ctx: &Context, file: &Path) -> Result<()> {
    let ladder = read_ladder(file)?;
    let mut store = ctx.open_store()?;
    let installed = store.install_rank_ladder(&ladder)?;
    info!(
        ranks = installed.ranks,
        members_reranked = installed.members_reranked,
        "rank ladder installed"
    );
    ctx.emit(&installed, |installed| {
        format!(
            "installed {} ranks, re-ranked {} members",
            installed.ranks, installed.members_reranked
        )
    })
}

pub fn show(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let Some(ladder) = store.load_rank_ladder()? else {
        anyhow::bail!("no rank ladder installed; run `pointsctl ladder install <file>`");
    };
    ctx.emit(&ladder.to_config(), |_| render(&ladder))
}

fn render(ladder: &RankLadder) -> String {
    let mut out = String::new();
    for rank in ladder.ranks() {
        let indent = if rank.parent.is_some() { "  " } else { "" };
        match rank.kind {
            RankKind::Category => {
                let _ = writeln!(out, "{indent}{}/", rank.name);
            }
            RankKind::Leaf => {
                let manual = if rank.manual_only { " (manual)" } else { "" };
                let _ = writeln!(
                    out,
                    "{indent}{:<24} {:>8}{manual}",
                    rank.name, rank.threshold_points
                );
            }
        }
    }
    out.trim_end().to_string()
}
