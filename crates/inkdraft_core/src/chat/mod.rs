//! Refinement conversation state.

pub mod tracker;

pub use tracker::{ProcessingState, ProcessingStatus, RefinementTracker, TrackerError};
