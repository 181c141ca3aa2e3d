//! Validation errors for tally events
//!
//! Raised when a structurally valid record carries values the aggregation
//! keyspaces cannot accept.

use thiserror::Error;

/// Event validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Blank candidate_id")]
    BlankCandidateId,

    #[error("Blank state name: {raw:?}")]
    BlankRegion { raw: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::BlankRegion { raw: "  ".to_string() };
        assert_eq!(err.to_string(), "Blank state name: \"  \"");
        assert_eq!(ValidationError::BlankCandidateId.to_string(), "Blank candidate_id");
    }
}
