#![forbid(unsafe_code)]

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberRow {
    pub id: String,
    pub display_name: Option<String>,
    pub points: i64,
    pub rank_name: Option<String>,
    pub revision: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// One applied ledger change. `change` is the delta after clamping,
/// `requested` the delta the caller asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PointsHistoryRow {
    pub seq: i64,
    pub member_id: String,
    pub change: i64,
    pub requested: i64,
    pub reason: String,
    pub related_task_id: Option<String>,
    pub related_donation_id: Option<String>,
    pub balance_after: i64,
    pub created_at_ms: i64,
}

impl PointsHistoryRow {
    pub fn is_deadline_miss(&self) -> bool {
        pl_core::is_deadline_miss(&self.reason)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditRow {
    pub seq: i64,
    pub actor_id: Option<String>,
    pub action: String,
    pub meta: serde_json::Value,
    pub points: Option<i64>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RankPromotion {
    pub member_id: String,
    pub old_rank: Option<String>,
    pub new_rank: String,
    pub points: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LadderInstall {
    pub ranks: usize,
    pub members_reranked: usize,
}
