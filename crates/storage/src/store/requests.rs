#![forbid(unsafe_code)]

use pl_core::AuditAction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateMemberRequest {
    pub member_id: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListMembersRequest {
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListAuditRequest {
    pub limit: usize,
    pub action: Option<AuditAction>,
    pub actor_id: Option<String>,
}
