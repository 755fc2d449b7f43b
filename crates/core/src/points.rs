#![forbid(unsafe_code)]

use crate::ids::{MemberId, MemberIdError};
use serde::{Deserialize, Serialize};

/// Reason prefix written by the deadline-miss sweep. Rows carrying it are
/// deductions, never counted as submissions.
pub const DEADLINE_MISS_MARKER: &str = "[deadline-miss]";

const MAX_REASON_LEN: usize = 512;
const MAX_RELATED_ID_LEN: usize = 128;

pub fn is_deadline_miss(reason: &str) -> bool {
    reason.trim_start().starts_with(DEADLINE_MISS_MARKER)
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("delta is missing")]
    MissingDelta,
    #[error("delta {raw:?} is not an integer")]
    NonIntegerDelta { raw: String },
    #[error("delta must be non-zero")]
    ZeroDelta,
    #[error("reason must not be empty")]
    EmptyReason,
    #[error("reason is longer than 512 bytes")]
    ReasonTooLong,
    #[error("related id must be 1..=128 bytes")]
    InvalidRelatedId,
    #[error("invalid member id: {0}")]
    MemberId(#[from] MemberIdError),
}

/// Parses a textual delta such as `"+250"` or `"-40"`.
pub fn parse_delta(raw: &str) -> Result<i64, InputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InputError::MissingDelta);
    }
    let invalid = || InputError::NonIntegerDelta {
        raw: raw.to_string(),
    };
    let (negative, digits) = match trimmed.as_bytes()[0] {
        b'+' => (false, &trimmed[1..]),
        b'-' => (true, &trimmed[1..]),
        _ => (false, trimmed),
    };
    // Exactly one optional sign; `i64::parse` would accept another.
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value = if negative {
        trimmed.parse::<i64>()
    } else {
        digits.parse::<i64>()
    };
    value.map_err(|_| invalid())
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RelatedEntity {
    Task(String),
    Donation(String),
}

impl RelatedEntity {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            RelatedEntity::Task(id) => Some(id),
            RelatedEntity::Donation(_) => None,
        }
    }

    pub fn donation_id(&self) -> Option<&str> {
        match self {
            RelatedEntity::Task(_) => None,
            RelatedEntity::Donation(id) => Some(id),
        }
    }

    fn id(&self) -> &str {
        match self {
            RelatedEntity::Task(id) | RelatedEntity::Donation(id) => id,
        }
    }
}

/// A requested mutation of one member's balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsChange {
    pub member_id: MemberId,
    pub delta: i64,
    pub reason: String,
    pub related: Option<RelatedEntity>,
}

impl PointsChange {
    pub fn new(
        member_id: MemberId,
        delta: i64,
        reason: impl Into<String>,
        related: Option<RelatedEntity>,
    ) -> Result<Self, InputError> {
        let change = Self {
            member_id,
            delta,
            reason: reason.into().trim().to_string(),
            related,
        };
        change.validate()?;
        Ok(change)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if self.delta == 0 {
            return Err(InputError::ZeroDelta);
        }
        let reason = self.reason.trim();
        if reason.is_empty() {
            return Err(InputError::EmptyReason);
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(InputError::ReasonTooLong);
        }
        if let Some(related) = &self.related {
            let id = related.id().trim();
            if id.is_empty() || id.len() > MAX_RELATED_ID_LEN {
                return Err(InputError::InvalidRelatedId);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppliedChange {
    pub new_points: i64,
    pub applied: i64,
}

/// Applies `delta` to `current` with a floor of zero. `applied` is the delta
/// that actually took effect and is what the history records.
pub fn clamp_change(current: i64, delta: i64) -> AppliedChange {
    let current = current.max(0);
    let new_points = current.saturating_add(delta).max(0);
    AppliedChange {
        new_points,
        applied: new_points - current,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsOutcome {
    pub member_id: MemberId,
    pub new_points: i64,
    pub applied_delta: i64,
    pub requested_delta: i64,
    pub rank_changed: bool,
    pub old_rank: Option<String>,
    pub new_rank: Option<String>,
    pub history_seq: i64,
}
