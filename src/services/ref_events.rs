//! Ref status change notifications.
//!
//! Emitted after a status write commits, so reporting collaborators can decide
//! whether to alert ("first failure", "still red", "recovered").

use crate::models::{CiRef, RefStatus};
use serde::Serialize;
use tokio::sync::broadcast;

/// Event: ref-status-changed
/// Emitted when a pipeline completion moves a ref to a new status.
pub const REF_STATUS_CHANGED_EVENT: &str = "ref-status-changed";

/// Payload for ref-status-changed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefStatusChanged {
    /// Local ref ID.
    pub ref_id: i64,

    pub project_id: i64,

    pub ref_path: String,

    /// Pipeline whose completion drove the change.
    pub pipeline_id: i64,

    /// Status before the change.
    pub from: RefStatus,

    /// Status after the change.
    pub to: RefStatus,

    /// Whether `to` is a failing status.
    pub failing: bool,
}

impl RefStatusChanged {
    pub fn new(ci_ref: &CiRef, pipeline_id: i64, from: RefStatus, to: RefStatus) -> Self {
        Self {
            ref_id: ci_ref.id,
            project_id: ci_ref.project_id,
            ref_path: ci_ref.ref_path.clone(),
            pipeline_id,
            from,
            to,
            failing: to.is_failing(),
        }
    }

    /// A previously failing ref went green.
    pub fn is_recovery(&self) -> bool {
        self.to == RefStatus::Fixed
    }
}

/// Fan-out of status changes to any number of subscribers.
#[derive(Debug, Clone)]
pub struct RefEventEmitter {
    sender: broadcast::Sender<RefStatusChanged>,
}

impl RefEventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefStatusChanged> {
        self.sender.subscribe()
    }

    /// Emit a change. Having no subscribers is not an error.
    pub fn emit(&self, event: RefStatusChanged) {
        match self.sender.send(event) {
            Ok(receivers) => log::debug!(
                "[{}] delivered to {} subscribers",
                REF_STATUS_CHANGED_EVENT,
                receivers
            ),
            Err(_) => log::debug!("[{}] no subscribers", REF_STATUS_CHANGED_EVENT),
        }
    }
}
