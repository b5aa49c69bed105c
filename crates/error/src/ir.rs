//! Error types raised by the target IR toolkit while constructing or verifying
//! modules.

use thiserror::Error;

/// The result type for use in the IR toolkit.
pub type Result<T> = std::result::Result<T, Error>;

/// This error type is for use when building or checking IR modules.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// Emitted when an attempt is made to define a symbol that already exists
    /// in the module's symbol table.
    #[error("The symbol `@{_0}` is already defined in this module")]
    DuplicateSymbol(String),

    /// Emitted when a lookup is made for a symbol that the module does not
    /// contain.
    #[error("The symbol `@{_0}` does not exist in this module")]
    UnknownSymbol(String),

    /// Emitted when a body is attached to a function that already has one.
    #[error("The function `@{_0}` already has a body")]
    FunctionAlreadyDefined(String),

    /// Emitted when the module fails structural verification. The individual
    /// problems are reported as diagnostics.
    #[error("Module verification failed with {_0} error(s)")]
    VerificationFailed(usize),
}
