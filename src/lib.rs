//! CI ref status - rolled-up pipeline status per project ref.
//!
//! Every finished pipeline moves its ref through a six-state machine
//! (`unknown`, `success`, `failed`, `fixed`, `broken`, `still_failing`) so
//! reporting code can tell a first failure from a ref that is still red, and
//! a recovery from steady green.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

use std::sync::Arc;

use config::TrackerConfig;
use error::AppError;
use repository::SqliteRefRepository;
use services::RefStatusTracker;

/// Open the configured database and build a tracker on top of it.
pub async fn open_tracker(config: &TrackerConfig) -> Result<RefStatusTracker, AppError> {
    config.validate()?;
    let pool = db::initialize(&config.database_path).await?;
    Ok(RefStatusTracker::new(
        Arc::new(SqliteRefRepository::new(pool)),
        config,
    ))
}
