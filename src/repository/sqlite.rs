//! SQLite implementation of `RefRepository`.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::RefRepository;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{CiRef, FinishedPipeline, RefStatus};

const REF_COLUMNS: &str =
    "id, project_id, ref_path, status, lock_version, last_pipeline_id, created_at, updated_at";

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Ref repository backed by the `ci_refs` and `ci_pipelines` tables.
#[derive(Clone)]
pub struct SqliteRefRepository {
    pool: DbPool,
}

impl SqliteRefRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl RefRepository for SqliteRefRepository {
    async fn find(&self, project_id: i64, ref_path: &str) -> Result<Option<CiRef>, AppError> {
        let ci_ref = sqlx::query_as::<_, CiRef>(&format!(
            "SELECT {REF_COLUMNS} FROM ci_refs WHERE project_id = ? AND ref_path = ?"
        ))
        .bind(project_id)
        .bind(ref_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ci_ref)
    }

    async fn get(&self, ref_id: i64) -> Result<Option<CiRef>, AppError> {
        let ci_ref =
            sqlx::query_as::<_, CiRef>(&format!("SELECT {REF_COLUMNS} FROM ci_refs WHERE id = ?"))
                .bind(ref_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(ci_ref)
    }

    async fn find_or_create(&self, project_id: i64, ref_path: &str) -> Result<CiRef, AppError> {
        if let Some(existing) = self.find(project_id, ref_path).await? {
            return Ok(existing);
        }

        // A concurrent creator may win the insert; DO NOTHING lets us fall
        // through and read its row.
        let created_at = now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO ci_refs (project_id, ref_path, status, lock_version, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            ON CONFLICT(project_id, ref_path) DO NOTHING
            "#,
        )
        .bind(project_id)
        .bind(ref_path)
        .bind(RefStatus::Unknown.code())
        .bind(created_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            log::debug!(
                "ci_ref for project {} {} created concurrently, reusing it",
                project_id,
                ref_path
            );
        }

        self.find(project_id, ref_path).await?.ok_or_else(|| {
            AppError::database_with_op(
                format!("ci_ref for project {} {} vanished", project_id, ref_path),
                "find_or_create",
            )
        })
    }

    async fn record_finished_pipeline(&self, pipeline: &FinishedPipeline) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ci_pipelines (id, project_id, ci_ref_id, status, finished_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(pipeline.id)
        .bind(pipeline.project_id)
        .bind(pipeline.ci_ref_id)
        .bind(&pipeline.status)
        .bind(pipeline.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_finished_pipeline_id(&self, ref_id: i64) -> Result<Option<i64>, AppError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM ci_pipelines
            WHERE ci_ref_id = ?
            ORDER BY finished_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(ref_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn compare_and_set_status(
        &self,
        ref_id: i64,
        expected_version: i64,
        status: RefStatus,
        pipeline_id: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE ci_refs
            SET status = ?,
                lock_version = lock_version + 1,
                last_pipeline_id = ?,
                updated_at = ?
            WHERE id = ? AND lock_version = ?
            "#,
        )
        .bind(status.code())
        .bind(pipeline_id)
        .bind(now())
        .bind(ref_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish a lost race from a missing row
        match self.get(ref_id).await? {
            Some(_) => Ok(false),
            None => Err(AppError::not_found_with_id("CiRef", ref_id.to_string())),
        }
    }

    async fn list_for_project(&self, project_id: i64) -> Result<Vec<CiRef>, AppError> {
        let refs = sqlx::query_as::<_, CiRef>(&format!(
            "SELECT {REF_COLUMNS} FROM ci_refs WHERE project_id = ? ORDER BY ref_path ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(refs)
    }
}
