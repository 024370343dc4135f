//! Checkpoint module for resumable runs.
//!
//! Provides:
//! - `CheckpointState`: outcome per identifier, plus the legacy layout
//! - `CheckpointStore`: shared, atomically persisted checkpoint file

mod state;
mod store;

pub use state::*;
pub use store::*;
