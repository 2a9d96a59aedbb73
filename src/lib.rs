//! # Index Assembly - Deterministic Piece Merging
//!
//! Large repositories are indexed by parallel workers, each writing an
//! independent, file-sharded *index piece*. This crate merges any number of
//! pieces into one globally ordered, query-ready index whose content does not
//! depend on how the work was split.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`index`] - Piece loading, merging, canonical ordering, statistics and output
//! - [`error`] - Error taxonomy with stable codes
//! - [`utils`] - Configuration, locking, progress and provenance helpers
//!
//! ## Quick Start
//!
//! ```no_run
//! use index_assembly::index::{assemble_index_pieces, AssembleOptions};
//! use std::path::PathBuf;
//!
//! let options = AssembleOptions::new(
//!     vec![PathBuf::from("pieces/worker-0"), PathBuf::from("pieces/worker-1")],
//!     "out/index-code",
//! );
//! let report = assemble_index_pieces(&options).unwrap();
//! println!("{} chunks from {} pieces", report.chunks, report.pieces);
//! ```
//!
//! ## Determinism
//!
//! Pieces are folded in sorted directory order, then every chunk is moved to
//! its canonical position `(file, start, end)`. Postings, per-doc arrays and
//! vectors follow their chunks, and every vocabulary is sorted, so assembling
//! the same chunk set from one piece or from many yields identical output.

pub mod error;
pub mod index;
pub mod utils;

pub use error::{AssembleError, Result};
