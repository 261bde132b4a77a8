//! High-level operations.
//!
//! This module contains the implementation of Kiln commands.

pub mod acceptance;
pub mod caveats;
pub mod kiln_fetch;
pub mod kiln_install;
pub mod livecheck;
pub mod receipt;

pub use acceptance::{format_report, run_acceptance, AcceptanceOptions, AcceptanceReport};
pub use caveats::render_caveats;
pub use kiln_fetch::{fetch_recipe, FetchedArtifact};
pub use kiln_install::{install, InstallOptions, InstallReport, Pipeline};
pub use livecheck::{livecheck, LivecheckReport};
pub use receipt::Receipt;
