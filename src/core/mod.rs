//! Core data structures for Kiln.
//!
//! - Recipes and their acceptance test declarations
//! - The target platform and platform predicates
//! - Environment overlays
//! - The pipeline error taxonomy

pub mod acceptance;
pub mod env;
pub mod error;
pub mod platform;
pub mod recipe;

pub use acceptance::AcceptanceSpec;
pub use env::{EnvOp, EnvOverlay};
pub use error::{PipelineError, PipelineResult};
pub use platform::{Os, Platform, PlatformPredicate};
pub use recipe::{BuildStep, Recipe, StepAction};
