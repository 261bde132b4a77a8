//! Kiln - a staged build-recipe engine
//!
//! This crate provides the core library functionality for Kiln: recipe
//! parsing, artifact fetching, resource staging, patching, build steps,
//! post-install relocation and acceptance testing.

pub mod builder;
pub mod core;
pub mod ops;
pub mod sources;
pub mod util;

/// Test utilities and mocks for Kiln unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides a counting mock transport plus tarball and
/// recipe fixtures.
#[cfg(test)]
pub mod test_support;

pub use core::{platform::Platform, recipe::Recipe, PipelineError};
pub use util::context::GlobalContext;
