//! Pipeline completion events.

use crate::error::AppError;
use crate::models::ci_ref::{branch_ref_path, tag_ref_path, RefOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Terminal status of a finished pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl PipelineStatus {
    /// Outcome this status feeds into the ref state machine, if any.
    ///
    /// Canceled and skipped pipelines still count as finished, so they make
    /// older completions stale, but they never move the status.
    pub fn ref_outcome(self) -> Option<RefOutcome> {
        match self {
            Self::Success => Some(RefOutcome::Success),
            Self::Failed => Some(RefOutcome::Failure),
            Self::Canceled | Self::Skipped => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event: a pipeline for a ref has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCompleted {
    /// GitLab pipeline ID.
    pub pipeline_id: i64,

    /// Project the pipeline ran in.
    pub project_id: i64,

    /// Fully qualified source ref, e.g. `refs/heads/main`.
    pub ref_path: String,

    /// Terminal status.
    pub status: PipelineStatus,

    /// Completion time; orders completions for the same ref.
    pub finished_at: DateTime<Utc>,
}

impl PipelineCompleted {
    /// Completion event for a branch pipeline.
    pub fn for_branch(
        pipeline_id: i64,
        project_id: i64,
        branch: &str,
        status: PipelineStatus,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pipeline_id,
            project_id,
            ref_path: branch_ref_path(branch),
            status,
            finished_at,
        }
    }

    /// Completion event for a tag pipeline.
    pub fn for_tag(
        pipeline_id: i64,
        project_id: i64,
        tag: &str,
        status: PipelineStatus,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pipeline_id,
            project_id,
            ref_path: tag_ref_path(tag),
            status,
            finished_at,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.ref_path.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "ref path must not be empty",
                "ref_path",
            ));
        }
        Ok(())
    }

    /// Completion time in Unix milliseconds, as stored.
    pub fn finished_at_millis(&self) -> i64 {
        self.finished_at.timestamp_millis()
    }
}

/// Finished pipeline row, attached to its tracked ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct FinishedPipeline {
    pub id: i64,
    pub project_id: i64,
    pub ci_ref_id: i64,
    pub status: String,
    /// Unix milliseconds.
    pub finished_at: i64,
}

impl FinishedPipeline {
    pub fn from_event(event: &PipelineCompleted, ci_ref_id: i64) -> Self {
        Self {
            id: event.pipeline_id,
            project_id: event.project_id,
            ci_ref_id,
            status: event.status.to_string(),
            finished_at: event.finished_at_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_ref_outcome() {
        assert_eq!(PipelineStatus::Success.ref_outcome(), Some(RefOutcome::Success));
        assert_eq!(PipelineStatus::Failed.ref_outcome(), Some(RefOutcome::Failure));
        assert_eq!(PipelineStatus::Canceled.ref_outcome(), None);
        assert_eq!(PipelineStatus::Skipped.ref_outcome(), None);
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{
            "pipeline_id": 41,
            "project_id": 7,
            "ref_path": "refs/heads/main",
            "status": "failed",
            "finished_at": "2024-05-01T12:00:00Z"
        }"#;
        let event: PipelineCompleted = serde_json::from_str(json).unwrap();
        assert_eq!(event.pipeline_id, 41);
        assert_eq!(event.status, PipelineStatus::Failed);
        assert_eq!(event.finished_at, at(1_714_564_800));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let json = r#"{
            "pipeline_id": 1,
            "project_id": 1,
            "ref_path": "refs/heads/main",
            "status": "running",
            "finished_at": "2024-05-01T12:00:00Z"
        }"#;
        assert!(serde_json::from_str::<PipelineCompleted>(json).is_err());
    }

    #[test]
    fn test_constructors_build_ref_paths() {
        let branch = PipelineCompleted::for_branch(1, 2, "main", PipelineStatus::Success, at(0));
        assert_eq!(branch.ref_path, "refs/heads/main");

        let tag = PipelineCompleted::for_tag(1, 2, "v1.2.0", PipelineStatus::Success, at(0));
        assert_eq!(tag.ref_path, "refs/tags/v1.2.0");
    }

    #[test]
    fn test_empty_ref_path_is_invalid() {
        let mut event = PipelineCompleted::for_branch(1, 2, "main", PipelineStatus::Success, at(0));
        assert!(event.validate().is_ok());

        event.ref_path = "  ".to_string();
        match event.validate().unwrap_err() {
            AppError::InvalidInput { field, .. } => assert_eq!(field.as_deref(), Some("ref_path")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_finished_pipeline_from_event() {
        let event = PipelineCompleted::for_branch(5, 3, "main", PipelineStatus::Canceled, at(2));
        let row = FinishedPipeline::from_event(&event, 11);
        assert_eq!(row.id, 5);
        assert_eq!(row.ci_ref_id, 11);
        assert_eq!(row.status, "canceled");
        assert_eq!(row.finished_at, 2_000);
    }
}
