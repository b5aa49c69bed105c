//! Error types for the host program model.

use thiserror::Error;

/// The result type for use with the host program model.
pub type Result<T> = std::result::Result<T, Error>;

/// This error type is for use when constructing or decoding parts of a traced
/// program.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error("`{_0}` could not be parsed as a type annotation: {_1}")]
    InvalidTypeString(String, String),

    #[error("`{_0}` is not a known tensor element type")]
    UnknownScalarType(String),

    /// Emitted when a tensor payload does not hold exactly the number of bytes
    /// its shape and element type require.
    #[error("Tensor payload of {actual} bytes does not match the {expected} bytes its shape requires")]
    TensorSizeMismatch { expected: usize, actual: usize },

    /// Emitted when the payload size that a tensor shape describes cannot be
    /// represented on this platform.
    #[error("A tensor of shape {_0:?} is too large to be represented")]
    TensorTooLarge(Vec<u64>),
}
