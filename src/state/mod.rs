//! State module for tracking polling progress
//!
//! # Components
//!
//! - `PollCursor`: where a source is in its paginated, time-windowed feed
//! - `SourceState`: per-source phase, cursor, failure count and next due time
//! - `BackoffPolicy`: exponential delay applied in BackoffWait

mod cursor;
mod source_state;

// Re-export main types
pub use cursor::PollCursor;
pub use source_state::{BackoffPolicy, SourcePhase, SourceState, MAX_WAIT};
