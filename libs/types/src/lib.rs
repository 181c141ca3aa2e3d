//! Types library for the election tally pipeline
//!
//! Shared definitions for everything that flows between the event stream,
//! the aggregation engine and the display collaborators.
//!
//! # Modules
//! - `ids`: Keys for the two aggregation keyspaces (CandidateId, RegionKey)
//! - `tally`: Stream events, per-key aggregates, summary counters
//! - `errors`: Validation error taxonomy

pub mod ids;
pub mod tally;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::tally::*;
    pub use crate::errors::*;
}
