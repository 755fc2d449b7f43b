#![forbid(unsafe_code)]

use crate::ids::MemberId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TaskApproved,
    PointsAdjusted,
    PointsBulkAdjusted,
    DeadlineMissed,
    DonationCredited,
    RankPromoted,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::TaskApproved => "task_approved",
            AuditAction::PointsAdjusted => "points_adjusted",
            AuditAction::PointsBulkAdjusted => "points_bulk_adjusted",
            AuditAction::DeadlineMissed => "deadline_missed",
            AuditAction::DonationCredited => "donation_credited",
            AuditAction::RankPromoted => "rank_promoted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "task_approved" => Some(AuditAction::TaskApproved),
            "points_adjusted" => Some(AuditAction::PointsAdjusted),
            "points_bulk_adjusted" => Some(AuditAction::PointsBulkAdjusted),
            "deadline_missed" => Some(AuditAction::DeadlineMissed),
            "donation_credited" => Some(AuditAction::DonationCredited),
            "rank_promoted" => Some(AuditAction::RankPromoted),
            _ => None,
        }
    }
}

/// An audit row as written by a caller. `actor_id` is `None` for
/// system-triggered actions such as the deadline sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub actor_id: Option<MemberId>,
    pub action: AuditAction,
    pub meta: serde_json::Value,
    pub points: Option<i64>,
}
