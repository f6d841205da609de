//! In-memory implementation of `RefRepository`.
//!
//! All state is held in memory and lost on restart. Used by tests and by
//! callers that only need the roll-up for the lifetime of the process.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::RefRepository;
use crate::error::AppError;
use crate::models::{CiRef, FinishedPipeline, RefStatus};

#[derive(Default)]
struct Tables {
    refs: HashMap<i64, CiRef>,
    /// `(project_id, ref_path)` -> ref ID.
    keys: HashMap<(i64, String), i64>,
    /// Every recorded pipeline ID; recording is keyed on it.
    pipeline_ids: HashSet<i64>,
    /// Ref ID -> `(finished_at, pipeline_id)` of its most recent pipeline.
    latest_by_ref: HashMap<i64, (i64, i64)>,
    next_ref_id: i64,
}

/// In-memory ref repository.
///
/// A single `RwLock` guards every table, so each trait call is atomic.
pub struct InMemoryRefRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRefRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Get current unix timestamp in seconds.
    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl Default for InMemoryRefRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefRepository for InMemoryRefRepository {
    async fn find(&self, project_id: i64, ref_path: &str) -> Result<Option<CiRef>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys
            .get(&(project_id, ref_path.to_string()))
            .and_then(|id| tables.refs.get(id))
            .cloned())
    }

    async fn get(&self, ref_id: i64) -> Result<Option<CiRef>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.refs.get(&ref_id).cloned())
    }

    async fn find_or_create(&self, project_id: i64, ref_path: &str) -> Result<CiRef, AppError> {
        let mut tables = self.tables.write().await;
        let key = (project_id, ref_path.to_string());

        if let Some(existing) = tables.keys.get(&key).and_then(|id| tables.refs.get(id)) {
            return Ok(existing.clone());
        }

        tables.next_ref_id += 1;
        let now = Self::now_secs();
        let ci_ref = CiRef {
            id: tables.next_ref_id,
            project_id,
            ref_path: ref_path.to_string(),
            status: RefStatus::Unknown.code(),
            lock_version: 0,
            last_pipeline_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.keys.insert(key, ci_ref.id);
        tables.refs.insert(ci_ref.id, ci_ref.clone());

        Ok(ci_ref)
    }

    async fn record_finished_pipeline(&self, pipeline: &FinishedPipeline) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        if !tables.refs.contains_key(&pipeline.ci_ref_id) {
            return Err(AppError::not_found_with_id(
                "CiRef",
                pipeline.ci_ref_id.to_string(),
            ));
        }
        if !tables.pipeline_ids.insert(pipeline.id) {
            return Ok(());
        }

        let candidate = (pipeline.finished_at, pipeline.id);
        tables
            .latest_by_ref
            .entry(pipeline.ci_ref_id)
            .and_modify(|latest| *latest = (*latest).max(candidate))
            .or_insert(candidate);
        Ok(())
    }

    async fn last_finished_pipeline_id(&self, ref_id: i64) -> Result<Option<i64>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.latest_by_ref.get(&ref_id).map(|(_, id)| *id))
    }

    async fn compare_and_set_status(
        &self,
        ref_id: i64,
        expected_version: i64,
        status: RefStatus,
        pipeline_id: i64,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        let Some(ci_ref) = tables.refs.get_mut(&ref_id) else {
            return Err(AppError::not_found_with_id("CiRef", ref_id.to_string()));
        };

        if ci_ref.lock_version != expected_version {
            return Ok(false);
        }

        ci_ref.status = status.code();
        ci_ref.lock_version += 1;
        ci_ref.last_pipeline_id = Some(pipeline_id);
        ci_ref.updated_at = Self::now_secs();
        Ok(true)
    }

    async fn list_for_project(&self, project_id: i64) -> Result<Vec<CiRef>, AppError> {
        let tables = self.tables.read().await;
        let mut refs: Vec<CiRef> = tables
            .refs
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        refs.sort_by(|a, b| a.ref_path.cmp(&b.ref_path));
        Ok(refs)
    }
}
