#![forbid(unsafe_code)]

pub mod flows;
mod ledger;
mod store;

pub use ledger::{
    BatchAdjustment, BatchIssue, BatchOutcome, LedgerConfig, LedgerError, MemberOverview, PointsLedger,
    TargetOutcome,
};
pub use store::*;
