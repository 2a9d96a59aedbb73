//! Error taxonomy for piece assembly.
//!
//! Every fatal condition is raised before the artifact writer runs, so a
//! failed assembly never leaves a partially written output directory.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssembleError>;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("No input piece directories given")]
    NoInputs,

    #[error("Missing input index directory: {}", .dir.display())]
    MissingInputDir { dir: PathBuf },

    #[error("Missing required artifact '{name}' in {}", .dir.display())]
    MissingArtifact { dir: PathBuf, name: String },

    #[error("Malformed artifact '{}': {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("file_meta required for chunk metadata in {} ({missing} chunk(s) without a file)", .dir.display())]
    MissingFileMetadata { dir: PathBuf, missing: usize },

    #[error("Missing compatibilityKey for index: {}", .dir.display())]
    MissingCompatibilityKey { dir: PathBuf },

    #[error("assemble-pieces compatibilityKey mismatch:\n{}", format_key_list(.keys))]
    CompatibilityKeyMismatch { keys: Vec<(PathBuf, String)> },

    #[error("{label} length mismatch ({actual} !== {expected}) in {}", .dir.display())]
    LengthMismatch {
        label: String,
        actual: usize,
        expected: usize,
        dir: PathBuf,
    },

    #[error(
        "Embedding {property} mismatch ({expected} from {} !== {actual} from {})",
        .expected_dir.display(),
        .actual_dir.display()
    )]
    EmbeddingMismatch {
        property: &'static str,
        expected: String,
        actual: String,
        expected_dir: PathBuf,
        actual_dir: PathBuf,
    },

    #[error("assembleIndexPieces found no chunks to merge")]
    NoChunks,

    #[error("Index lock already held: {}", .path.display())]
    LockHeld { path: PathBuf },

    #[error("Cross-file enrichment failed: {0}")]
    Enrichment(String),

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl AssembleError {
    /// Stable identifier for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoInputs => "NO_INPUTS",
            Self::MissingInputDir { .. } => "MISSING_INPUT_DIR",
            Self::MissingArtifact { .. } => "MISSING_ARTIFACT",
            Self::Malformed { .. } => "MALFORMED_ARTIFACT",
            Self::MissingFileMetadata { .. } => "MISSING_FILE_METADATA",
            Self::MissingCompatibilityKey { .. } => "COMPATIBILITY_KEY_MISSING",
            Self::CompatibilityKeyMismatch { .. } => "COMPATIBILITY_KEY_MISMATCH",
            Self::LengthMismatch { .. } => "LENGTH_MISMATCH",
            Self::EmbeddingMismatch { .. } => "EMBEDDING_MISMATCH",
            Self::NoChunks => "NO_CHUNKS",
            Self::LockHeld { .. } => "LOCK_HELD",
            Self::Enrichment(_) => "ENRICHMENT_FAILED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

fn format_key_list(keys: &[(PathBuf, String)]) -> String {
    keys.iter()
        .map(|(dir, key)| format!("- {}: {}", dir.display(), key))
        .collect::<Vec<_>>()
        .join("\n")
}
