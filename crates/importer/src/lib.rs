//! This library implements the import of programs traced by a host
//! machine-learning runtime into the Graft IR, producing a verified module that
//! is ready for further compilation.
//!
//! # Process Overview
//!
//! More information can be found in the module-level documentation of each
//! part of this codebase. In brief, an import proceeds as follows:
//!
//! 1. The [`module_builder::ModuleBuilder`] declares every function of the
//!    program, using the [`type_mapper::TypeMapper`] to translate their
//!    signatures, and imports the program's global slots.
//! 2. Each function body is walked by a [`function_importer::FunctionImporter`]
//!    that translates nodes into IR operations. Nested graphs of control-flow
//!    nodes become regions of those operations.
//! 3. Constants are materialized on demand by the
//!    [`value_importer::ValueImporter`], which makes sure that each constant is
//!    created at most once per function. Constants that several functions use
//!    are placed in global slots beforehand, and so are created once per
//!    module.
//! 4. The resulting module is verified before it is handed back.
//!
//! Every problem encountered on the way is reported as a diagnostic, which is
//! captured by the [`diagnostics::CaptureScope`] of the build it arose in.
//!
//! # Semantics Preservation
//!
//! The importer performs no optimization whatsoever. It does not fold,
//! deduplicate by value, or eliminate anything, and so the produced module
//! performs exactly the operations that were traced.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod constant;
pub mod diagnostics;
pub mod function_importer;
pub mod module_builder;
pub mod operation;
pub mod scope;
pub mod type_mapper;
pub mod value_importer;

pub use module_builder::{BuildFailure, BuildOutput, ImportConfig, ModuleBuilder};
