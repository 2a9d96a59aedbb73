//! Utility functions and data structures.
//!
//! ## Modules
//!
//! - [`app_data`] - Application data directory and configuration (XDG-compliant)
//! - [`lock`] - Exclusive lock over an index output directory
//! - [`progress`] - Progress bars, no-op without the `progress` feature
//! - [`provenance`] - Repository provenance providers

pub mod app_data;
pub mod lock;
pub mod progress;
pub mod provenance;

pub use app_data::*;
pub use lock::IndexLock;
pub use provenance::{GitProvenance, NoProvenance, ProvenanceProvider};
