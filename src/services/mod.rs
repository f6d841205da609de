//! Business logic services.
//!
//! This module contains the ref status roll-up and the notifications it emits.
//! Services only talk to storage through the `RefRepository` trait.

pub mod event_feed;
pub mod ref_events;
pub mod ref_tracker;

pub use ref_events::{RefEventEmitter, RefStatusChanged};
pub use ref_tracker::{RefStatusTracker, UpdateOutcome};
