use thiserror::Error;

/// Error type for invalid operations.
///
/// Every error raised while a process is being constructed, sized or bound is fatal:
/// the process is not usable afterwards.
/// Errors raised while running a timestep fail that step.
#[derive(Error, Debug)]
pub enum MamError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Insufficient scratch buffer. Required {required} bytes, supplied {supplied} bytes")]
    Allocation { required: usize, supplied: usize },
    #[error("Field '{0}' is not registered")]
    MissingField(String),
    #[error("Field '{field}' has shape {actual}, expected {expected}")]
    ShapeMismatch {
        field: String,
        expected: String,
        actual: String,
    },
    #[error("Field '{field}' has units '{actual}', expected '{expected}'")]
    UnitMismatch {
        field: String,
        expected: String,
        actual: String,
    },
    #[error("Field '{0}' is already borrowed for writing")]
    FieldAliased(String),
    #[error("Kernel failure in column {column}: {reason}")]
    KernelFailure { column: usize, reason: String },
    #[error("Field '{field}' value {value} at column {column}, index {index} is outside [{min}, {max}]")]
    OutOfBounds {
        field: String,
        column: usize,
        index: usize,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type for `Result<T, MamError>`.
pub type MamResult<T> = Result<T, MamError>;
