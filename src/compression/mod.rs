//! Incremental compression pipeline.
//!
//! [`delta`] finds the messages no part covers yet, [`registry`] manages
//! version records and their files, [`writer`] renders the two output
//! formats, and [`orchestrator`] drives the whole protocol against the
//! summarizer capability.

pub mod delta;
pub mod orchestrator;
pub mod registry;
pub mod writer;

pub use delta::{DeltaReport, detect_delta};
pub use orchestrator::{Compressor, validate_settings};
pub use registry::{
    VersionContent, VersionInfo, VersionRegistry, parse_version_id_from_filename,
    version_filename,
};
pub use writer::{OutputMessage, synthesize_messages};
