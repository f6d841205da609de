//! Line-oriented feed of pipeline completions.
//!
//! Each input line is one `PipelineCompleted` JSON object. A line that fails
//! (malformed JSON, invalid event, storage error) only affects itself; the
//! feed reports it and moves on to the next line.

use crate::error::AppError;
use crate::models::PipelineCompleted;
use crate::services::ref_tracker::{RefStatusTracker, UpdateOutcome};
use serde::Serialize;

/// Result of applying one input line.
#[derive(Debug, Serialize)]
pub struct LineReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<UpdateOutcome>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
}

impl LineReport {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Apply one input line. Blank lines yield `None`.
pub async fn apply_line(tracker: &RefStatusTracker, line: &str) -> Option<LineReport> {
    if line.trim().is_empty() {
        return None;
    }

    let event: PipelineCompleted = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("Skipping malformed event: {}", e);
            return Some(LineReport {
                pipeline_id: None,
                ref_path: None,
                outcome: None,
                error: Some(AppError::invalid_input(format!("malformed event: {}", e))),
            });
        }
    };

    let (outcome, error) = match tracker.update_status_by(&event).await {
        Ok(outcome) => (Some(outcome), None),
        Err(e) => {
            log::warn!(
                "Pipeline {} on {} failed: {}",
                event.pipeline_id,
                event.ref_path,
                e
            );
            (None, Some(e))
        }
    };

    Some(LineReport {
        pipeline_id: Some(event.pipeline_id),
        ref_path: Some(event.ref_path),
        outcome,
        error,
    })
}
