//! Error types for incremental PCA and streaming moment operations.

use thiserror::Error;

/// Errors reported by [`IncrementalPCA`](crate::IncrementalPCA) and the
/// streaming moment helpers.
///
/// Every failing call leaves the model it was invoked on untouched.
#[derive(Error, Debug)]
pub enum PcaError {
    /// The operation needs a model produced by `fit` or `load`.
    #[error("PCA model is not initialized; call fit or load first")]
    NotInitialized,

    /// Feature count of the input disagrees with the model's `dims()`.
    #[error("Dimension mismatch: model has {expected} features, input has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A requested component count (or similar argument) is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Buffers handed to an operation do not agree in shape.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Input has zero rows or zero columns where data is required.
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Input contains NaN while the NaN policy is `Reject`.
    #[error("Non-finite input: {0}")]
    NonFiniteInput(String),

    /// The linear algebra backend failed to decompose a matrix.
    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    /// Reading or writing a serialized model failed.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PcaError>;

impl PcaError {
    #[must_use]
    pub const fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    #[must_use]
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }
}
