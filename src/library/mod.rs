//! Library module for document registration
//!
//! Resolves item paths, maps documents to resource URIs, and populates the
//! registry either eagerly or from a background task.

mod loader;
mod path;
mod registry;
mod views;

pub use loader::*;
pub use path::*;
pub use registry::*;
pub use views::*;
