//! Error types for product quantization

use thiserror::Error;

/// Errors that can occur while quantizing, packing or persisting layers
#[derive(Debug, Error)]
pub enum PqError {
    /// Invalid (K, M) relative to the input matrix
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Layer category the codec has no mapping for
    #[error("Unsupported layer: {0}")]
    UnsupportedLayer(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Matrix without rows or columns
    #[error("Weight matrix is empty")]
    EmptyMatrix,

    /// Index value outside `[0, K)` handed to the packer
    #[error("Index {value} at position {position} out of range for {clusters} clusters")]
    IndexOutOfRange {
        position: usize,
        value: u32,
        clusters: usize,
    },

    /// Packed buffer shorter than the requested index count needs
    #[error("Packed buffer too small: need {required} words, got {provided}")]
    BufferTooSmall { required: usize, provided: usize },

    /// Internal invariant broken (pack/unpack disagree)
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Invalid container or serialized payload
    #[error("Invalid PQW data: {0}")]
    InvalidFormat(String),

    /// Serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PqError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PqError::Configuration(message.into())
    }

    /// True for errors the caller can fix by supplying different parameters.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PqError::Configuration(_))
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            PqError::Configuration(_) => "configuration",
            PqError::UnsupportedLayer(_) => "unsupported_layer",
            PqError::DimensionMismatch { .. } => "dimension_mismatch",
            PqError::EmptyMatrix => "empty_matrix",
            PqError::IndexOutOfRange { .. } => "index_out_of_range",
            PqError::BufferTooSmall { .. } => "buffer_too_small",
            PqError::InvariantViolation(_) => "invariant_violation",
            PqError::InvalidFormat(_) => "invalid_format",
            PqError::Serialization(_) => "serialization",
            PqError::Io(_) => "io_error",
        }
    }
}

/// Result type for product quantization operations
pub type Result<T> = std::result::Result<T, PqError>;
