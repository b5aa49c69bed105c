//! The traced program model consumed by the Graft importer.
//!
//! A host machine-learning runtime records a previously executed computation
//! as a _traced program_: one or more named functions, each a graph of
//! operation nodes, plus a shared table of the constant values that were
//! captured during tracing. The marshaling layer that extracts these from a
//! live runtime is not part of this project; it hands us the structures in this
//! crate, and the importer only ever reads them.
//!
//! The model is deliberately plain data:
//!
//! - [`types::SourceType`] describes the host runtime's static types, and can
//!   be parsed from the runtime's annotation strings.
//! - [`graph::TracedGraph`] is an ordered, acyclic sequence of
//!   [`graph::Node`]s whose control-flow nodes own nested graphs.
//! - [`constant::ConstantTable`] holds captured values keyed by their
//!   identity, so that aliasing in the source is observable.
//! - [`program::Program`] ties the functions, constants and global slots
//!   together.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod constant;
pub mod graph;
pub mod parse;
pub mod program;
pub mod types;

pub use program::Program;
