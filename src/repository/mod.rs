//! Repository abstraction for ref status persistence.
//!
//! `RefRepository` is a versioned-record interface: refs are read together
//! with their `lock_version`, and status writes only land if that version is
//! still current. Implementations provide different backends (SQLite,
//! in-memory).

mod memory;
mod sqlite;

pub use memory::InMemoryRefRepository;
pub use sqlite::SqliteRefRepository;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{CiRef, FinishedPipeline, RefStatus};

/// Repository trait for tracked refs and their finished pipelines.
#[async_trait]
pub trait RefRepository: Send + Sync {
    /// Get the ref for a `(project, ref_path)` pair, if tracked.
    async fn find(&self, project_id: i64, ref_path: &str) -> Result<Option<CiRef>, AppError>;

    /// Get a ref by its ID.
    async fn get(&self, ref_id: i64) -> Result<Option<CiRef>, AppError>;

    /// Get the ref for a `(project, ref_path)` pair, creating it as `unknown`
    /// if absent.
    ///
    /// Concurrent callers for the same key all observe the same row.
    async fn find_or_create(&self, project_id: i64, ref_path: &str) -> Result<CiRef, AppError>;

    /// Record a finished pipeline. Recording the same pipeline ID again is a
    /// no-op.
    async fn record_finished_pipeline(&self, pipeline: &FinishedPipeline) -> Result<(), AppError>;

    /// ID of the most recently finished pipeline of a ref, ordered by
    /// completion time and then by pipeline ID.
    async fn last_finished_pipeline_id(&self, ref_id: i64) -> Result<Option<i64>, AppError>;

    /// Write a new status if the ref is still at `expected_version`.
    ///
    /// Returns `false` on a version mismatch; the caller re-reads and retries.
    async fn compare_and_set_status(
        &self,
        ref_id: i64,
        expected_version: i64,
        status: RefStatus,
        pipeline_id: i64,
    ) -> Result<bool, AppError>;

    /// All tracked refs of a project, ordered by ref path.
    async fn list_for_project(&self, project_id: i64) -> Result<Vec<CiRef>, AppError>;
}
