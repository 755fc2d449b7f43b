#![forbid(unsafe_code)]

use pl_core::ids::MemberIdError;
use pl_core::{InputError, LadderError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("invalid member id: {0}")]
    MemberId(#[from] MemberIdError),
    #[error("rank ladder: {0}")]
    Ladder(#[from] LadderError),
    #[error("unknown member")]
    UnknownMember,
    #[error("unknown rank")]
    UnknownRank,
    #[error("member already exists")]
    MemberAlreadyExists,
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQLITE",
            Self::InvalidInput(message) if message.starts_with("RESET_REQUIRED") => {
                "RESET_REQUIRED"
            }
            Self::InvalidInput(_) | Self::Input(_) | Self::MemberId(_) => "INVALID_INPUT",
            Self::Ladder(_) => "INVALID_LADDER",
            Self::UnknownMember => "UNKNOWN_MEMBER",
            Self::UnknownRank => "UNKNOWN_RANK",
            Self::MemberAlreadyExists => "MEMBER_EXISTS",
        }
    }
}
