//! SQLite connection pool with WAL mode.
//!
//! Several completion workers write to the same `ci_refs` rows, so the pool
//! runs in WAL mode with a generous busy timeout; conflicting writes are
//! resolved by the ref's `lock_version`, not by SQLite locking.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Create a new connection pool with WAL mode enabled.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let db_url = format!("sqlite:{}", db_path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        // Create the database file if it doesn't exist
        .create_if_missing(true)
        // WAL lets status reads proceed while a completion is being written
        .journal_mode(SqliteJournalMode::Wal)
        // NORMAL is durable enough under WAL
        .synchronous(SqliteSynchronous::Normal)
        // ci_pipelines.ci_ref_id must point at an existing ref
        .foreign_keys(true)
        // Wait for the write lock instead of failing with SQLITE_BUSY
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        // Writers serialize on SQLite anyway; keep the pool small
        .max_connections(5)
        // Keep one connection warm
        .min_connections(1)
        // Connection timeout
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    // Verify WAL mode is enabled
    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;

    debug_assert!(
        mode.0.to_lowercase() == "wal",
        "WAL mode should be enabled, got: {}",
        mode.0
    );

    Ok(pool)
}
