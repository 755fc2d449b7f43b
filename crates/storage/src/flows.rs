#![forbid(unsafe_code)]

//! Caller-side flows. Each one invokes the ledger engine, then writes the
//! audit row and raises notifications. The engine itself does neither.

use crate::ledger::{BatchAdjustment, BatchOutcome, LedgerError, PointsLedger, TargetOutcome};
use crate::store::RankPromotion;
use pl_core::ids::MemberId;
use pl_core::{
    AuditAction, DEADLINE_MISS_MARKER, InputError, NewAuditEntry, PointsOutcome, RelatedEntity,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Notification transport. Delivery is outside this crate; the default
/// methods drop everything.
pub trait NotificationSink {
    fn notify_points(&self, _outcome: &PointsOutcome, _reason: &str) {}

    fn notify_rank_change(
        &self,
        _member_id: &str,
        _old_rank: Option<&str>,
        _new_rank: Option<&str>,
    ) {
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskApproval {
    pub reviewer: MemberId,
    pub member: MemberId,
    pub task_id: String,
    pub title: String,
    pub award: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationCredit {
    pub actor: Option<MemberId>,
    pub member: MemberId,
    pub donation_id: String,
    pub points: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAdjustment {
    pub actor: MemberId,
    pub member_ids: Vec<String>,
    pub delta: i64,
    pub reason: String,
}

/// One overdue task found by the deadline sweep. `penalty` is a magnitude;
/// the sweep always deducts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedDeadline {
    pub member_id: String,
    pub task_id: String,
    pub title: String,
    pub penalty: i64,
}

pub fn approve_task(
    ledger: &PointsLedger,
    sink: &dyn NotificationSink,
    approval: &TaskApproval,
) -> Result<PointsOutcome, LedgerError> {
    if approval.award <= 0 {
        return Err(LedgerError::InvalidInput(
            "task award must be positive".to_string(),
        ));
    }
    let outcome = ledger.apply_points_change(
        &approval.member,
        approval.award,
        &approval.title,
        Some(RelatedEntity::Task(approval.task_id.clone())),
    )?;
    ledger.record_audit(NewAuditEntry {
        actor_id: Some(approval.reviewer.clone()),
        action: AuditAction::TaskApproved,
        meta: json!({
            "member_id": approval.member.as_str(),
            "task_id": approval.task_id,
            "title": approval.title,
            "applied": outcome.applied_delta,
            "new_points": outcome.new_points,
        }),
        points: Some(outcome.applied_delta),
    })?;
    notify(sink, &outcome, &approval.title);
    Ok(outcome)
}

pub fn credit_donation(
    ledger: &PointsLedger,
    sink: &dyn NotificationSink,
    credit: &DonationCredit,
) -> Result<PointsOutcome, LedgerError> {
    if credit.points <= 0 {
        return Err(LedgerError::InvalidInput(
            "donation credit must be positive".to_string(),
        ));
    }
    let reason = format!("donation {}", credit.donation_id.trim());
    let outcome = ledger.apply_points_change(
        &credit.member,
        credit.points,
        &reason,
        Some(RelatedEntity::Donation(credit.donation_id.clone())),
    )?;
    ledger.record_audit(NewAuditEntry {
        actor_id: credit.actor.clone(),
        action: AuditAction::DonationCredited,
        meta: json!({
            "member_id": credit.member.as_str(),
            "donation_id": credit.donation_id,
            "new_points": outcome.new_points,
        }),
        points: Some(outcome.applied_delta),
    })?;
    notify(sink, &outcome, &reason);
    Ok(outcome)
}

pub fn adjust_points(
    ledger: &PointsLedger,
    sink: &dyn NotificationSink,
    actor: &MemberId,
    member: &MemberId,
    delta: i64,
    reason: &str,
) -> Result<PointsOutcome, LedgerError> {
    let outcome = ledger.apply_points_change(member, delta, reason, None)?;
    ledger.record_audit(NewAuditEntry {
        actor_id: Some(actor.clone()),
        action: AuditAction::PointsAdjusted,
        meta: json!({
            "member_id": member.as_str(),
            "reason": reason.trim(),
            "requested": outcome.requested_delta,
            "applied": outcome.applied_delta,
            "new_points": outcome.new_points,
        }),
        points: Some(outcome.applied_delta),
    })?;
    notify(sink, &outcome, reason);
    Ok(outcome)
}

/// Runs the engine once per target and writes one summarizing audit row,
/// even when every target failed or the batch was aborted.
pub fn bulk_adjust(
    ledger: &PointsLedger,
    sink: &dyn NotificationSink,
    request: &BulkAdjustment,
) -> Result<BatchOutcome, LedgerError> {
    let outcome = ledger.apply_batch(&BatchAdjustment {
        member_ids: request.member_ids.clone(),
        delta: request.delta,
        reason: request.reason.clone(),
    })?;
    Ok(finish_bulk(ledger, sink, request, outcome))
}

fn finish_bulk(
    ledger: &PointsLedger,
    sink: &dyn NotificationSink,
    request: &BulkAdjustment,
    mut outcome: BatchOutcome,
) -> BatchOutcome {
    let summary = NewAuditEntry {
        actor_id: Some(request.actor.clone()),
        action: AuditAction::PointsBulkAdjusted,
        meta: json!({
            "delta": request.delta,
            "reason": request.reason.trim(),
            "succeeded": outcome.succeeded,
            "failed": outcome.failed,
            "aborted": outcome.aborted,
            "results": outcome.results,
        }),
        points: Some(request.delta),
    };
    if let Err(err) = ledger.record_audit(summary) {
        warn!(actor = %request.actor, error = %err, "bulk adjustment audit failed");
        outcome.audit_failed(None, &err);
    }
    for applied in outcome.results.iter().filter_map(TargetOutcome::applied) {
        notify(sink, applied, &request.reason);
    }
    outcome
}

/// Deducts points for each missed deadline. System-triggered: audit rows
/// carry no actor. A failing miss or audit write is recorded and the sweep
/// moves on; only a fatal store error stops it.
pub fn deadline_sweep(
    ledger: &PointsLedger,
    sink: &dyn NotificationSink,
    misses: &[MissedDeadline],
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for miss in misses {
        if miss.penalty == 0 {
            let err = LedgerError::from(InputError::ZeroDelta);
            warn!(member_id = %miss.member_id, task_id = %miss.task_id, "deadline miss without penalty");
            outcome.push(TargetOutcome::Failed {
                member_id: miss.member_id.clone(),
                error_code: err.code().to_string(),
                message: err.to_string(),
            });
            continue;
        }
        let reason = format!("{DEADLINE_MISS_MARKER} {}", miss.title.trim());
        let target = match ledger.apply_target(
            &miss.member_id,
            -miss.penalty.saturating_abs(),
            &reason,
            Some(RelatedEntity::Task(miss.task_id.clone())),
        ) {
            Ok(target) => target,
            Err(err) => {
                outcome.abort(&miss.member_id, &err);
                break;
            }
        };

        let mut fatal = None;
        if let TargetOutcome::Applied(applied) = &target {
            let audit = ledger.record_audit(NewAuditEntry {
                actor_id: None,
                action: AuditAction::DeadlineMissed,
                meta: json!({
                    "member_id": applied.member_id.as_str(),
                    "task_id": miss.task_id,
                    "title": miss.title,
                    "requested": applied.requested_delta,
                    "applied": applied.applied_delta,
                }),
                points: Some(applied.applied_delta),
            });
            if let Err(err) = audit {
                warn!(
                    member_id = %applied.member_id,
                    task_id = %miss.task_id,
                    error = %err,
                    "deadline miss audit failed"
                );
                outcome.audit_failed(Some(applied.member_id.as_str()), &err);
                if err.is_fatal() {
                    fatal = Some(err);
                }
            }
            notify(sink, applied, &reason);
        }
        outcome.push(target);
        if let Some(err) = fatal {
            outcome.abort(&miss.member_id, &err);
            break;
        }
    }
    info!(
        misses = misses.len(),
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        audit_failures = outcome.audit_failures.len(),
        aborted = outcome.aborted.is_some(),
        "deadline sweep finished"
    );
    outcome
}

pub fn promote_rank(
    ledger: &PointsLedger,
    sink: &dyn NotificationSink,
    actor: &MemberId,
    member: &MemberId,
    rank_name: &str,
) -> Result<RankPromotion, LedgerError> {
    let promotion = ledger.promote_rank(member, rank_name)?;
    ledger.record_audit(NewAuditEntry {
        actor_id: Some(actor.clone()),
        action: AuditAction::RankPromoted,
        meta: json!({
            "member_id": promotion.member_id,
            "old_rank": promotion.old_rank,
            "new_rank": promotion.new_rank,
        }),
        points: Some(promotion.points),
    })?;
    if promotion.old_rank.as_deref() != Some(promotion.new_rank.as_str()) {
        sink.notify_rank_change(
            &promotion.member_id,
            promotion.old_rank.as_deref(),
            Some(&promotion.new_rank),
        );
    }
    Ok(promotion)
}

fn notify(sink: &dyn NotificationSink, outcome: &PointsOutcome, reason: &str) {
    sink.notify_points(outcome, reason);
    if outcome.rank_changed {
        sink.notify_rank_change(
            outcome.member_id.as_str(),
            outcome.old_rank.as_deref(),
            outcome.new_rank.as_deref(),
        );
    }
}
