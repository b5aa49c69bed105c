//! Error handling types and utilities for the Graft project.
//!
//! # Error Conventions
//!
//! As we are providing libraries that toolchain integrators interact with from
//! _code_, we keep our errors strongly typed at all times. While libraries like
//! [anyhow](https://docs.rs/anyhow/latest/anyhow/) are well-suited for
//! application code, they make it more difficult than is necessary to handle
//! specific errors in library code. To that end, each layer of the project has
//! its own error type here:
//!
//! - [`trace`] for the host program model handed to us by the marshaling layer.
//! - [`ir`] for the target IR toolkit.
//! - [`import`] for translation failures inside the import pipeline.
//! - [`build`] for the errors returned at the boundary of the module builder.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod build;
pub mod import;
pub mod ir;
pub mod trace;
