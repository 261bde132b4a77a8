//! Artifact sources.
//!
//! Downloads go through a [`Transport`], are verified against their
//! SHA-256 and cached by checksum; archives are unpacked into work
//! directories.

pub mod archive;
pub mod fetch;
pub mod transport;

pub use archive::extract_archive;
pub use fetch::{DownloadCache, Fetcher};
pub use transport::{HttpTransport, Transport};
