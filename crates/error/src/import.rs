//! Error types and utilities to do with the translation of a traced program
//! into the target IR.

use thiserror::Error;

/// The result type for use in the import pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// This error type is for use during the process of importing a traced program
/// into the target IR.
///
/// Each of these aborts the import of the current function, which the module
/// builder then escalates to abort the whole build.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// Emitted when we encounter a host runtime type that has no faithful
    /// representation in the target IR's type system.
    #[error("The source type `{_0}` is not supported")]
    UnsupportedType(String),

    /// Emitted when a graph node names an operation for which no IR equivalent
    /// is known.
    #[error("The operation `{identifier}` at {location} is not supported")]
    UnsupportedOperation {
        /// The operation identifier exactly as it appeared on the node.
        identifier: String,

        /// The rendered position of the node in the graph.
        location: String,
    },

    /// Emitted when a function-valued reference names a function that is not
    /// part of the program being imported.
    #[error("The function `{_0}` is not part of the program being imported")]
    UnresolvedFunction(String),

    /// A generic failure while importing a captured value, used as a catch-all
    /// for value-import problems that do not have specific variants.
    #[error("Value import failed: {_0}")]
    ImportError(String),

    /// An invariant of either the traced input or the importer itself has been
    /// violated.
    ///
    /// This indicates a bug rather than an expected translation gap, and is
    /// always fatal to the current build.
    #[error("Internal consistency error: {_0}")]
    InternalConsistency(String),
}

impl Error {
    /// Returns `true` if `self` indicates an invariant violation rather than a
    /// translation gap.
    #[must_use]
    pub fn is_internal_consistency(&self) -> bool {
        matches!(self, Self::InternalConsistency(_))
    }
}
