//! CI ref model: the rolled-up pipeline status of one `(project, ref)` pair.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Prefix of fully qualified branch refs.
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Prefix of fully qualified tag refs.
pub const TAG_REF_PREFIX: &str = "refs/tags/";

/// Build the ref path of a branch.
pub fn branch_ref_path(name: &str) -> String {
    format!("{}{}", BRANCH_REF_PREFIX, name)
}

/// Build the ref path of a tag.
pub fn tag_ref_path(name: &str) -> String {
    format!("{}{}", TAG_REF_PREFIX, name)
}

/// Rolled-up status of a ref.
///
/// The names carry one step of history: `fixed` is a success right after a
/// failure, `broken` a failure right after a success, and `still_failing` a
/// failure after another failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefStatus {
    #[default]
    Unknown,
    Success,
    Failed,
    Fixed,
    Broken,
    StillFailing,
}

/// Pipeline result that drives a ref transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefOutcome {
    Success,
    Failure,
}

impl RefStatus {
    pub const ALL: [RefStatus; 6] = [
        Self::Unknown,
        Self::Success,
        Self::Failed,
        Self::Fixed,
        Self::Broken,
        Self::StillFailing,
    ];

    /// Stable integer encoding used for storage.
    pub fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Success => 1,
            Self::Failed => 2,
            Self::Fixed => 3,
            Self::Broken => 4,
            Self::StillFailing => 5,
        }
    }

    /// Decode a stored status code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    /// Snake-case name, as exposed to reporting code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Fixed => "fixed",
            Self::Broken => "broken",
            Self::StillFailing => "still_failing",
        }
    }

    /// Next status after a pipeline with the given outcome.
    ///
    /// Total over every `(status, outcome)` pair; pairs without a rule keep
    /// the current status.
    pub fn apply(self, outcome: RefOutcome) -> Self {
        use RefOutcome::{Failure, Success};

        match (self, outcome) {
            (Self::Unknown | Self::Fixed, Success) => Self::Success,
            (Self::Failed | Self::Broken | Self::StillFailing, Success) => Self::Fixed,
            (Self::Unknown, Failure) => Self::Failed,
            (Self::Failed | Self::Broken, Failure) => Self::StillFailing,
            (Self::Success | Self::Fixed, Failure) => Self::Broken,
            (Self::Success, Success) | (Self::StillFailing, Failure) => self,
        }
    }

    /// Whether the ref is currently red.
    pub fn is_failing(self) -> bool {
        matches!(self, Self::Failed | Self::Broken | Self::StillFailing)
    }
}

/// Whether a status name denotes a failing ref. Unknown names are not failing.
pub fn is_failing_state(status_name: &str) -> bool {
    status_name
        .parse::<RefStatus>()
        .is_ok_and(RefStatus::is_failing)
}

impl FromStr for RefStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::invalid_input(format!("unknown ref status '{}'", s)))
    }
}

impl std::fmt::Display for RefStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked ref row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CiRef {
    /// Local ref ID.
    pub id: i64,

    /// Owning project ID.
    pub project_id: i64,

    /// Fully qualified ref, e.g. `refs/heads/main`.
    pub ref_path: String,

    /// Status code, see [`RefStatus::code`].
    pub status: i64,

    /// Optimistic-lock version, bumped on every status write.
    pub lock_version: i64,

    /// Pipeline whose completion last moved the status.
    pub last_pipeline_id: Option<i64>,

    /// When the ref was first tracked (Unix).
    pub created_at: i64,

    /// When the status was last written (Unix).
    pub updated_at: i64,
}

impl CiRef {
    /// Decode the stored status code.
    pub fn status_enum(&self) -> Result<RefStatus, AppError> {
        RefStatus::from_code(self.status).ok_or_else(|| {
            AppError::database_with_op(
                format!("ref {} has invalid status code {}", self.id, self.status),
                "decode_status",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RefOutcome::{Failure, Success};
    use RefStatus::*;

    #[test]
    fn test_success_transitions() {
        assert_eq!(Unknown.apply(Success), RefStatus::Success);
        assert_eq!(Fixed.apply(Success), RefStatus::Success);
        assert_eq!(RefStatus::Success.apply(Success), RefStatus::Success);
        assert_eq!(Failed.apply(Success), Fixed);
        assert_eq!(Broken.apply(Success), Fixed);
        assert_eq!(StillFailing.apply(Success), Fixed);
    }

    #[test]
    fn test_failure_transitions() {
        assert_eq!(Unknown.apply(Failure), Failed);
        assert_eq!(Failed.apply(Failure), StillFailing);
        assert_eq!(Broken.apply(Failure), StillFailing);
        assert_eq!(StillFailing.apply(Failure), StillFailing);
        assert_eq!(RefStatus::Success.apply(Failure), Broken);
        assert_eq!(Fixed.apply(Failure), Broken);
    }

    #[test]
    fn test_outcome_is_reflected_in_failing_flag() {
        for status in RefStatus::ALL {
            assert!(!status.apply(Success).is_failing(), "{status} + success");
            assert!(status.apply(Failure).is_failing(), "{status} + failure");
        }
    }

    #[test]
    fn test_history_sequence() {
        let sequence = [Success, Failure, Failure, Success, Success, Failure];
        let statuses: Vec<RefStatus> = sequence
            .iter()
            .scan(Unknown, |status, outcome| {
                *status = status.apply(*outcome);
                Some(*status)
            })
            .collect();

        assert_eq!(
            statuses,
            vec![RefStatus::Success, Broken, StillFailing, Fixed, RefStatus::Success, Broken]
        );
    }

    #[test]
    fn test_is_failing() {
        let failing: Vec<RefStatus> = RefStatus::ALL
            .into_iter()
            .filter(|s| s.is_failing())
            .collect();
        assert_eq!(failing, vec![Failed, Broken, StillFailing]);
    }

    #[test]
    fn test_is_failing_state_by_name() {
        assert!(is_failing_state("failed"));
        assert!(is_failing_state("broken"));
        assert!(is_failing_state("still_failing"));
        assert!(!is_failing_state("fixed"));
        assert!(!is_failing_state("success"));
        assert!(!is_failing_state("unknown"));
        assert!(!is_failing_state("canceled"));
    }

    #[test]
    fn test_status_codes_are_stable() {
        let codes: Vec<i64> = RefStatus::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(RefStatus::from_code(5), Some(StillFailing));
        assert_eq!(RefStatus::from_code(6), None);
        assert_eq!(RefStatus::from_code(-1), None);
    }

    #[test]
    fn test_names_parse_and_display() {
        for status in RefStatus::ALL {
            assert_eq!(status.to_string().parse::<RefStatus>().unwrap(), status);
        }
        assert_eq!(serde_json::to_string(&StillFailing).unwrap(), "\"still_failing\"");
        assert!("STILL_FAILING".parse::<RefStatus>().is_err());
    }

    #[test]
    fn test_ref_paths() {
        assert_eq!(branch_ref_path("main"), "refs/heads/main");
        assert_eq!(tag_ref_path("v1.0"), "refs/tags/v1.0");
    }

    #[test]
    fn test_invalid_stored_code() {
        let row = CiRef {
            id: 9,
            project_id: 1,
            ref_path: branch_ref_path("main"),
            status: 42,
            lock_version: 0,
            last_pipeline_id: None,
            created_at: 0,
            updated_at: 0,
        };
        assert!(matches!(row.status_enum(), Err(AppError::Database { .. })));
    }
}
