//! Error types for approval definitions

/// A flow or step definition that cannot be materialized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Step threshold must be at least 1 (step '{step}')")]
    InvalidThreshold { step: String },

    #[error("Rejection minimum must be a positive integer, got {0}")]
    InvalidRejectionMinimum(u32),

    #[error("Rejection maximum must be a positive integer, got {0}")]
    InvalidRejectionMaximum(u32),

    #[error("Rejection maximum ({max}) cannot be smaller than the minimum ({min})")]
    RejectionBoundsInverted { min: u32, max: u32 },

    #[error("Malformed step definition: {0}")]
    MalformedStep(String),

    #[error("Flow has no steps")]
    EmptyFlow,
}

/// Result type alias for definition validation
pub type ValidationResult<T> = Result<T, ValidationError>;
