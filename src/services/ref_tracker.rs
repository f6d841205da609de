//! Ref status tracker.
//!
//! Rolls pipeline completions up into the per-ref status:
//! - Lazily creates the ref the first time one of its pipelines finishes
//! - Only the most recently finished pipeline of a ref may move its status
//! - Status writes are guarded by the ref's `lock_version` and retried on
//!   conflict, never by locks
//!
//! Stale completions are rejected as they arrive, not reconciled against the
//! full history: delivering a newer failure before an older success leaves
//! the ref `failed`, where in-order delivery would have ended at `broken`.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::TrackerConfig;
use crate::error::AppError;
use crate::models::{CiRef, FinishedPipeline, PipelineCompleted, RefStatus};
use crate::repository::RefRepository;
use crate::services::ref_events::{RefEventEmitter, RefStatusChanged};

/// Result of feeding one completion into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The completion moved the ref (possibly to the same status).
    Transitioned { from: RefStatus, to: RefStatus },

    /// The completion is the latest but drives no change: a canceled or
    /// skipped pipeline, or a redelivery of the pipeline already applied.
    Unchanged { status: RefStatus },

    /// A newer pipeline has already finished for this ref.
    Stale { status: RefStatus },
}

impl UpdateOutcome {
    /// Status of the ref after the update.
    pub fn status(&self) -> RefStatus {
        match *self {
            Self::Transitioned { to, .. } => to,
            Self::Unchanged { status } | Self::Stale { status } => status,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Tracks the rolled-up CI status of refs.
///
/// Cheap to clone; clones share the repository and notification channel.
#[derive(Clone)]
pub struct RefStatusTracker {
    repo: Arc<dyn RefRepository>,
    events: RefEventEmitter,
    max_lock_retries: u32,
}

impl RefStatusTracker {
    pub fn new(repo: Arc<dyn RefRepository>, config: &TrackerConfig) -> Self {
        Self {
            repo,
            events: RefEventEmitter::new(config.notification_capacity),
            max_lock_retries: config.max_lock_retries.max(1),
        }
    }

    /// Subscribe to committed status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RefStatusChanged> {
        self.events.subscribe()
    }

    /// Get the ref a completed pipeline belongs to, creating it if needed.
    pub async fn ensure_for(&self, event: &PipelineCompleted) -> Result<CiRef, AppError> {
        event.validate()?;
        self.repo
            .find_or_create(event.project_id, &event.ref_path)
            .await
    }

    /// Apply a pipeline completion to its ref.
    ///
    /// # Returns
    /// What happened to the ref; stale and non-driving completions are not
    /// errors. Errors are storage failures or an exhausted retry budget.
    pub async fn update_status_by(
        &self,
        event: &PipelineCompleted,
    ) -> Result<UpdateOutcome, AppError> {
        let ci_ref = self.ensure_for(event).await?;
        self.repo
            .record_finished_pipeline(&FinishedPipeline::from_event(event, ci_ref.id))
            .await?;

        for attempt in 1..=self.max_lock_retries {
            let current = self
                .repo
                .get(ci_ref.id)
                .await?
                .ok_or_else(|| AppError::not_found_with_id("CiRef", ci_ref.id.to_string()))?;
            let status = current.status_enum()?;

            let last_finished = self.repo.last_finished_pipeline_id(current.id).await?;
            if last_finished != Some(event.pipeline_id) {
                log::debug!(
                    "Pipeline {} on {} is stale (latest finished: {:?}), keeping {}",
                    event.pipeline_id,
                    current.ref_path,
                    last_finished,
                    status
                );
                return Ok(UpdateOutcome::Stale { status });
            }

            if current.last_pipeline_id == Some(event.pipeline_id) {
                return Ok(UpdateOutcome::Unchanged { status });
            }

            let Some(outcome) = event.status.ref_outcome() else {
                return Ok(UpdateOutcome::Unchanged { status });
            };
            let next = status.apply(outcome);

            if self
                .repo
                .compare_and_set_status(current.id, current.lock_version, next, event.pipeline_id)
                .await?
            {
                log::info!(
                    "Ref {} of project {}: {} -> {} (pipeline {})",
                    current.ref_path,
                    current.project_id,
                    status,
                    next,
                    event.pipeline_id
                );
                self.events.emit(RefStatusChanged::new(
                    &current,
                    event.pipeline_id,
                    status,
                    next,
                ));
                return Ok(UpdateOutcome::Transitioned { from: status, to: next });
            }

            log::debug!(
                "Lock conflict on ref {} at version {} (attempt {}), retrying",
                current.id,
                current.lock_version,
                attempt
            );
            tokio::task::yield_now().await;
        }

        log::warn!(
            "Giving up on pipeline {} for ref {} after {} lock conflicts",
            event.pipeline_id,
            ci_ref.id,
            self.max_lock_retries
        );
        Err(AppError::conflict(ci_ref.id, self.max_lock_retries))
    }

    /// Apply many completions concurrently, one future per event.
    ///
    /// Results are returned in input order.
    pub async fn process_batch(
        &self,
        events: &[PipelineCompleted],
    ) -> Vec<Result<UpdateOutcome, AppError>> {
        join_all(events.iter().map(|event| self.update_status_by(event))).await
    }

    /// Current status of a ref; `unknown` if it has never been tracked.
    pub async fn current_status(
        &self,
        project_id: i64,
        ref_path: &str,
    ) -> Result<RefStatus, AppError> {
        match self.repo.find(project_id, ref_path).await? {
            Some(ci_ref) => ci_ref.status_enum(),
            None => Ok(RefStatus::Unknown),
        }
    }

    pub async fn find_ref(
        &self,
        project_id: i64,
        ref_path: &str,
    ) -> Result<Option<CiRef>, AppError> {
        self.repo.find(project_id, ref_path).await
    }

    /// Tracked refs of a project that are currently failing.
    pub async fn failing_refs(&self, project_id: i64) -> Result<Vec<CiRef>, AppError> {
        let mut failing = Vec::new();
        for ci_ref in self.repo.list_for_project(project_id).await? {
            if ci_ref.status_enum()?.is_failing() {
                failing.push(ci_ref);
            }
        }
        Ok(failing)
    }

    pub fn is_failing(status: RefStatus) -> bool {
        status.is_failing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PipelineStatus;
    use crate::repository::InMemoryRefRepository;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn completed(id: i64, status: PipelineStatus, secs: i64) -> PipelineCompleted {
        PipelineCompleted::for_branch(id, 1, "main", status, at(secs))
    }

    fn tracker() -> RefStatusTracker {
        RefStatusTracker::new(
            Arc::new(InMemoryRefRepository::new()),
            &TrackerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_first_completion_creates_ref() {
        let tracker = tracker();
        assert_eq!(
            tracker.current_status(1, "refs/heads/main").await.unwrap(),
            RefStatus::Unknown
        );

        let outcome = tracker
            .update_status_by(&completed(1, PipelineStatus::Success, 1))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Transitioned {
                from: RefStatus::Unknown,
                to: RefStatus::Success
            }
        );

        let ci_ref = tracker.find_ref(1, "refs/heads/main").await.unwrap().unwrap();
        assert_eq!(ci_ref.last_pipeline_id, Some(1));
        assert_eq!(ci_ref.lock_version, 1);
    }

    #[tokio::test]
    async fn test_in_order_sequence() {
        let tracker = tracker();
        let sequence = [
            (PipelineStatus::Success, RefStatus::Success),
            (PipelineStatus::Failed, RefStatus::Broken),
            (PipelineStatus::Failed, RefStatus::StillFailing),
            (PipelineStatus::Success, RefStatus::Fixed),
            (PipelineStatus::Success, RefStatus::Success),
        ];

        for (i, (status, expected)) in sequence.into_iter().enumerate() {
            let id = i as i64 + 1;
            let outcome = tracker
                .update_status_by(&completed(id, status, id))
                .await
                .unwrap();
            assert_eq!(outcome.status(), expected, "pipeline {id}");
        }
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let tracker = tracker();
        tracker
            .update_status_by(&completed(2, PipelineStatus::Failed, 20))
            .await
            .unwrap();

        let outcome = tracker
            .update_status_by(&completed(1, PipelineStatus::Success, 10))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale { status: RefStatus::Failed });
        assert!(outcome.is_stale());
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let tracker = tracker();
        let event = completed(1, PipelineStatus::Failed, 1);

        tracker.update_status_by(&event).await.unwrap();
        let again = tracker.update_status_by(&event).await.unwrap();

        assert_eq!(again, UpdateOutcome::Unchanged { status: RefStatus::Failed });
        assert_eq!(
            tracker.current_status(1, "refs/heads/main").await.unwrap(),
            RefStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_canceled_pipeline_does_not_transition_but_supersedes() {
        let tracker = tracker();
        tracker
            .update_status_by(&completed(1, PipelineStatus::Failed, 1))
            .await
            .unwrap();

        let canceled = tracker
            .update_status_by(&completed(3, PipelineStatus::Canceled, 3))
            .await
            .unwrap();
        assert_eq!(canceled, UpdateOutcome::Unchanged { status: RefStatus::Failed });

        // Finished before the canceled one, so it no longer counts
        let late = tracker
            .update_status_by(&completed(2, PipelineStatus::Success, 2))
            .await
            .unwrap();
        assert!(late.is_stale());
        assert_eq!(late.status(), RefStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_ref_path_rejected() {
        let tracker = tracker();
        let mut event = completed(1, PipelineStatus::Success, 1);
        event.ref_path = String::new();

        let err = tracker.update_status_by(&event).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_transition_is_broadcast() {
        let tracker = tracker();
        let mut rx = tracker.subscribe();

        tracker
            .update_status_by(&completed(1, PipelineStatus::Failed, 1))
            .await
            .unwrap();
        tracker
            .update_status_by(&completed(2, PipelineStatus::Success, 2))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!((first.from, first.to), (RefStatus::Unknown, RefStatus::Failed));
        assert!(first.failing);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.pipeline_id, 2);
        assert!(second.is_recovery());
    }

    #[tokio::test]
    async fn test_failing_refs() {
        let tracker = tracker();
        tracker
            .update_status_by(&completed(1, PipelineStatus::Failed, 1))
            .await
            .unwrap();
        tracker
            .update_status_by(&PipelineCompleted::for_tag(
                2,
                1,
                "v1",
                PipelineStatus::Success,
                at(1),
            ))
            .await
            .unwrap();

        let failing = tracker.failing_refs(1).await.unwrap();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].ref_path, "refs/heads/main");
        assert!(RefStatusTracker::is_failing(RefStatus::StillFailing));
    }

    /// Repository whose status writes always lose the race.
    struct AlwaysConflicting {
        inner: InMemoryRefRepository,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RefRepository for AlwaysConflicting {
        async fn find(&self, project_id: i64, ref_path: &str) -> Result<Option<CiRef>, AppError> {
            self.inner.find(project_id, ref_path).await
        }

        async fn get(&self, ref_id: i64) -> Result<Option<CiRef>, AppError> {
            self.inner.get(ref_id).await
        }

        async fn find_or_create(
            &self,
            project_id: i64,
            ref_path: &str,
        ) -> Result<CiRef, AppError> {
            self.inner.find_or_create(project_id, ref_path).await
        }

        async fn record_finished_pipeline(
            &self,
            pipeline: &FinishedPipeline,
        ) -> Result<(), AppError> {
            self.inner.record_finished_pipeline(pipeline).await
        }

        async fn last_finished_pipeline_id(&self, ref_id: i64) -> Result<Option<i64>, AppError> {
            self.inner.last_finished_pipeline_id(ref_id).await
        }

        async fn compare_and_set_status(
            &self,
            _ref_id: i64,
            _expected_version: i64,
            _status: RefStatus,
            _pipeline_id: i64,
        ) -> Result<bool, AppError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn list_for_project(&self, project_id: i64) -> Result<Vec<CiRef>, AppError> {
            self.inner.list_for_project(project_id).await
        }
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let repo = Arc::new(AlwaysConflicting {
            inner: InMemoryRefRepository::new(),
            attempts: AtomicU32::new(0),
        });
        let config = TrackerConfig {
            max_lock_retries: 3,
            ..TrackerConfig::default()
        };
        let tracker = RefStatusTracker::new(repo.clone(), &config);

        let err = tracker
            .update_status_by(&completed(1, PipelineStatus::Success, 1))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 3);
    }
}
