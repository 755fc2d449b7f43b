#![forbid(unsafe_code)]

use super::{Context, member_id};
use crate::support::{rank_label, signed};
use anyhow::{Context as _, Result};
use pl_core::{PointsOutcome, parse_delta};
use pl_storage::flows::{
    self, BulkAdjustment, DonationCredit, MissedDeadline, NoopNotifier, TaskApproval,
};
use pl_storage::{BatchOutcome, RankPromotion, TargetOutcome};
use std::fmt::Write as _;
use std::path::Path;

pub fn award(ctx: &Context, actor: &str, member: &str, delta: &str, reason: &str) -> Result<()> {
    let actor = member_id(actor)?;
    let member = member_id(member)?;
    let delta = parse_delta(delta)?;
    let ledger = ctx.open_ledger()?;
    let outcome = flows::adjust_points(&ledger, &NoopNotifier, &actor, &member, delta, reason)?;
    ctx.emit(&outcome, render_outcome)
}

pub fn approve_task(
    ctx: &Context,
    reviewer: &str,
    member: &str,
    task_id: String,
    title: String,
    award: i64,
) -> Result<()> {
    let approval = TaskApproval {
        reviewer: member_id(reviewer)?,
        member: member_id(member)?,
        task_id,
        title,
        award,
    };
    let ledger = ctx.open_ledger()?;
    let outcome = flows::approve_task(&ledger, &NoopNotifier, &approval)?;
    ctx.emit(&outcome, render_outcome)
}

pub fn donate(
    ctx: &Context,
    actor: Option<&str>,
    member: &str,
    donation_id: String,
    points: i64,
) -> Result<()> {
    let credit = DonationCredit {
        actor: actor.map(member_id).transpose()?,
        member: member_id(member)?,
        donation_id,
        points,
    };
    let ledger = ctx.open_ledger()?;
    let outcome = flows::credit_donation(&ledger, &NoopNotifier, &credit)?;
    ctx.emit(&outcome, render_outcome)
}

pub fn bulk(
    ctx: &Context,
    actor: &str,
    delta: &str,
    reason: String,
    members: Vec<String>,
) -> Result<()> {
    let request = BulkAdjustment {
        actor: member_id(actor)?,
        member_ids: members,
        delta: parse_delta(delta)?,
        reason,
    };
    let ledger = ctx.open_ledger()?;
    let outcome = flows::bulk_adjust(&ledger, &NoopNotifier, &request)?;
    emit_batch(ctx, &outcome)
}

pub fn sweep(ctx: &Context, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let misses: Vec<MissedDeadline> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid missed-deadline list in {}", file.display()))?;
    let ledger = ctx.open_ledger()?;
    let outcome = flows::deadline_sweep(&ledger, &NoopNotifier, &misses);
    emit_batch(ctx, &outcome)
}

/// Prints the outcome, then fails the command if a fatal error cut it short.
fn emit_batch(ctx: &Context, outcome: &BatchOutcome) -> Result<()> {
    ctx.emit(outcome, render_batch)?;
    match &outcome.aborted {
        Some(issue) => anyhow::bail!("batch aborted: {} {}", issue.error_code, issue.message),
        None => Ok(()),
    }
}

pub fn promote(ctx: &Context, actor: &str, member: &str, rank: &str) -> Result<()> {
    let actor = member_id(actor)?;
    let member = member_id(member)?;
    let ledger = ctx.open_ledger()?;
    let promotion = flows::promote_rank(&ledger, &NoopNotifier, &actor, &member, rank)?;
    ctx.emit(&promotion, render_promotion)
}

fn render_outcome(outcome: &PointsOutcome) -> String {
    let mut out = format!(
        "{}: {} -> {} points",
        outcome.member_id,
        signed(outcome.applied_delta),
        outcome.new_points
    );
    if outcome.applied_delta != outcome.requested_delta {
        let _ = write!(out, " (requested {}, floored at zero)", signed(outcome.requested_delta));
    }
    if outcome.rank_changed {
        let _ = write!(
            out,
            "\nrank: {} -> {}",
            rank_label(outcome.old_rank.as_deref()),
            rank_label(outcome.new_rank.as_deref())
        );
    }
    out
}

fn render_batch(batch: &BatchOutcome) -> String {
    let mut out = String::new();
    for result in &batch.results {
        match result {
            TargetOutcome::Applied(outcome) => {
                let _ = writeln!(out, "ok    {}", render_outcome(outcome).replace('\n', "; "));
            }
            TargetOutcome::Failed {
                member_id,
                error_code,
                message,
            } => {
                let _ = writeln!(out, "fail  {member_id}: {error_code} {message}");
            }
        }
    }
    for issue in &batch.audit_failures {
        let target = issue.member_id.as_deref().unwrap_or("summary");
        let _ = writeln!(out, "audit {target}: {} {}", issue.error_code, issue.message);
    }
    if let Some(issue) = &batch.aborted {
        let target = issue.member_id.as_deref().unwrap_or("-");
        let _ = writeln!(out, "abort {target}: {} {}", issue.error_code, issue.message);
    }
    let _ = write!(out, "{} applied, {} failed", batch.succeeded, batch.failed);
    out
}

fn render_promotion(promotion: &RankPromotion) -> String {
    format!(
        "{}: {} -> {} at {} points",
        promotion.member_id,
        rank_label(promotion.old_rank.as_deref()),
        promotion.new_rank,
        promotion.points
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_core::ids::MemberId;
    use pl_storage::BatchIssue;

    fn outcome(applied: i64, requested: i64, rank_changed: bool) -> PointsOutcome {
        PointsOutcome {
            member_id: MemberId::try_new("m1").expect("member id"),
            new_points: 0,
            applied_delta: applied,
            requested_delta: requested,
            rank_changed,
            old_rank: Some("Member I".to_string()),
            new_rank: Some("Newcomer".to_string()),
            history_seq: 7,
        }
    }

    #[test]
    fn clamped_outcomes_show_the_requested_delta() {
        let text = render_outcome(&outcome(-120, -500, true));
        assert_eq!(
            text,
            "m1: -120 -> 0 points (requested -500, floored at zero)\nrank: Member I -> Newcomer"
        );
    }

    #[test]
    fn batch_summary_lists_every_target() {
        let batch = BatchOutcome {
            results: vec![
                TargetOutcome::Applied(outcome(5, 5, false)),
                TargetOutcome::Failed {
                    member_id: "ghost".to_string(),
                    error_code: "NOT_FOUND".to_string(),
                    message: "member ghost not found".to_string(),
                },
            ],
            succeeded: 1,
            failed: 1,
            ..BatchOutcome::default()
        };
        let text = render_batch(&batch);
        assert!(text.contains("ok    m1: +5 -> 0 points"));
        assert!(text.contains("fail  ghost: NOT_FOUND member ghost not found"));
        assert!(!text.contains("abort"));
        assert!(text.ends_with("1 applied, 1 failed"));
    }

    #[test]
    fn aborted_batch_names_the_stopping_target() {
        let batch = BatchOutcome {
            results: vec![TargetOutcome::Applied(outcome(5, 5, false))],
            succeeded: 1,
            aborted: Some(BatchIssue {
                member_id: Some("m2".to_string()),
                error_code: "PERSISTENCE_FAILURE".to_string(),
                message: "disk full".to_string(),
            }),
            audit_failures: vec![BatchIssue {
                member_id: None,
                error_code: "PERSISTENCE_FAILURE".to_string(),
                message: "audit unavailable".to_string(),
            }],
            ..BatchOutcome::default()
        };
        let text = render_batch(&batch);
        assert!(text.contains("audit summary: PERSISTENCE_FAILURE audit unavailable"));
        assert!(text.contains("abort m2: PERSISTENCE_FAILURE disk full"));
        assert!(text.ends_with("1 applied, 0 failed"));
    }
}
