pub mod artifact;
pub mod assemble;
pub mod graphs;
pub mod merge;
pub mod ordering;
pub mod postings;
pub mod reader;
pub mod state;
pub mod stats;
pub mod types;
pub mod writer;

pub use assemble::{assemble_index_pieces, AssembleOptions, AssembledIndex, Assembler, AssemblyReport};
pub use reader::IndexPiece;
pub use types::*;
pub use writer::{ArtifactWriter, JsonArtifactWriter};
