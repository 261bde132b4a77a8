//! Recipe build machinery.
//!
//! Steps, resources, patches and post-install relocation. Orchestration
//! across these lives in [`crate::ops`].

pub mod events;
pub mod patch;
pub mod relocate;
pub mod resource;
pub mod step;

pub use events::{NullReporter, PipelineEvent, Reporter, Stage};
pub use patch::{apply_patches, AppliedPatch};
pub use relocate::{relocate, Relocation, Relocations};
pub use resource::Stager;
pub use step::{ResolvedCommand, StepOutcome, StepRunner};
