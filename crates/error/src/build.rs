//! Error types returned at the boundary of the module builder.

use thiserror::Error;

use crate::import;

/// The result type to be used at the boundaries of the module builder.
pub type Result<T> = std::result::Result<T, Error>;

/// The root of the error hierarchy for a build.
///
/// All translation errors are able to be implicitly converted to this error
/// type, as this is the type that is handed back to the caller of a build.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Import(#[from] import::Error),

    /// The produced module failed the target IR's own structural verification,
    /// or otherwise disagrees with the program it was built from.
    ///
    /// Since the importer should never produce ill-formed IR, this always
    /// indicates a bug.
    #[error("Internal consistency error: {_0}")]
    InternalConsistency(String),
}

impl Error {
    /// Returns `true` if `self` indicates an invariant violation, whether it
    /// was raised during translation or during verification of the module.
    #[must_use]
    pub fn is_internal_consistency(&self) -> bool {
        match self {
            Self::Import(e) => e.is_internal_consistency(),
            Self::InternalConsistency(_) => true,
        }
    }
}
