//! Tracker configuration.
//!
//! Settings are persisted as a JSON file. Missing keys fall back to defaults,
//! and a missing file yields the default configuration.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default bound on optimistic-lock retries per completion event.
pub const DEFAULT_MAX_LOCK_RETRIES: u32 = 100;

/// Default buffer size of the status-change broadcast channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Default database file name.
const DEFAULT_DB_FILE: &str = "ci-ref-status.db";

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum compare-and-swap attempts before giving up on an event.
    pub max_lock_retries: u32,

    /// Capacity of the status-change notification channel.
    pub notification_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DB_FILE),
            max_lock_retries: DEFAULT_MAX_LOCK_RETRIES,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl TrackerConfig {
    /// Load settings from a JSON file, using defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            AppError::invalid_input(format!("Malformed settings {}: {}", path.display(), e))
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Save settings to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject settings the tracker cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_lock_retries == 0 {
            return Err(AppError::invalid_input_field(
                "must allow at least one attempt",
                "max_lock_retries",
            ));
        }
        if self.notification_capacity == 0 {
            return Err(AppError::invalid_input_field(
                "must be greater than zero",
                "notification_capacity",
            ));
        }
        Ok(())
    }
}
