//! # sp-core
//!
//! Shared error type for the shapeprod workspace.
//!
//! Every failure the shape production engine can report is fatal to the run,
//! so the error enum is flat: each variant names the class of problem and
//! carries a human-readable message.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

pub use error::{Error, Result};

/// Workspace version, reported by `shapeprod version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
