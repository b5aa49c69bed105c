//! A small MLIR-like intermediate representation toolkit.
//!
//! This crate provides the target side of the Graft importer: the IR that
//! traced programs are translated into. It is intentionally minimal, providing
//! only what is needed to construct, check and inspect modules:
//!
//! - [`types`] and [`intern`] define the type system, with types interned per
//!   module so that type equality is id equality.
//! - [`module`] defines modules, functions, globals, regions, operations and
//!   the out-of-line resource table.
//! - [`dialect`] defines the `func` and `torch` operation vocabularies, and
//!   [`registration`] makes them available exactly once per process.
//! - [`diagnostic`] is the diagnostic engine through which every problem is
//!   reported.
//! - [`verify`] checks modules for structural and typing errors, and
//!   [`print`] renders them as text.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod diagnostic;
pub mod dialect;
pub mod intern;
pub mod module;
pub mod print;
pub mod registration;
pub mod types;
pub mod verify;

pub use module::Module;
