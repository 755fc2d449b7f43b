#![forbid(unsafe_code)]

pub mod audit;
pub mod ladder;
pub mod points;

pub use audit::{AuditAction, NewAuditEntry};
pub use ladder::{LadderConfig, LadderError, Rank, RankKind, RankLadder, RankSpec};
pub use points::{
    AppliedChange, DEADLINE_MISS_MARKER, InputError, PointsChange, PointsOutcome, RelatedEntity,
    clamp_change, is_deadline_miss, parse_delta,
};

pub mod ids {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    const MAX_MEMBER_ID_LEN: usize = 128;

    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct MemberId(String);

    impl MemberId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, MemberIdError> {
            let value = value.into();
            validate_member_id(&value)?;
            Ok(Self(value))
        }
    }

    impl fmt::Display for MemberId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl TryFrom<String> for MemberId {
        type Error = MemberIdError;

        fn try_from(value: String) -> Result<Self, Self::Error> {
            Self::try_new(value)
        }
    }

    impl From<MemberId> for String {
        fn from(value: MemberId) -> Self {
            value.0
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
    pub enum MemberIdError {
        #[error("member id is empty")]
        Empty,
        #[error("member id is longer than 128 bytes")]
        TooLong,
        #[error("member id must start with an ASCII letter or digit")]
        InvalidFirstChar,
        #[error("member id has invalid char {ch:?} at index {index}")]
        InvalidChar { ch: char, index: usize },
    }

    fn validate_member_id(value: &str) -> Result<(), MemberIdError> {
        if value.is_empty() {
            return Err(MemberIdError::Empty);
        }
        if value.len() > MAX_MEMBER_ID_LEN {
            return Err(MemberIdError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(MemberIdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(MemberIdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate().skip(1) {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '@') {
                continue;
            }
            return Err(MemberIdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn member_id_validation() {
            assert_eq!(MemberId::try_new("").unwrap_err(), MemberIdError::Empty);
            assert_eq!(
                MemberId::try_new("-lead").unwrap_err(),
                MemberIdError::InvalidFirstChar
            );
            assert_eq!(
                MemberId::try_new("ann smith").unwrap_err(),
                MemberIdError::InvalidChar { ch: ' ', index: 3 }
            );
            assert_eq!(
                MemberId::try_new("a".repeat(129)).unwrap_err(),
                MemberIdError::TooLong
            );
            assert!(MemberId::try_new("vol-042").is_ok());
            assert!(MemberId::try_new("ann.smith@club").is_ok());
        }

        #[test]
        fn member_id_serde_rejects_invalid_values() {
            let id: MemberId = serde_json::from_str("\"m_1\"").expect("valid id");
            assert_eq!(id.as_str(), "m_1");
            assert!(serde_json::from_str::<MemberId>("\"bad id\"").is_err());
        }
    }
}
