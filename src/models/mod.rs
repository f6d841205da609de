//! Data models for the application.
//!
//! These models represent the tracked refs stored in the local SQLite database
//! and the pipeline completion events that drive them.
//!
//! Row models derive Serialize for reporting and FromRow for SQLx queries.

pub mod ci_ref;
pub mod pipeline;

// Re-exports for convenient access
pub use ci_ref::{is_failing_state, CiRef, RefOutcome, RefStatus};
pub use pipeline::{FinishedPipeline, PipelineCompleted, PipelineStatus};
