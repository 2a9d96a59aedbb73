//! Global statistics and the final postings bundle.
//!
//! The finalizer runs once, after canonical ordering. It sorts every
//! vocabulary, normalizes every postings list and recomputes BM25 parameters
//! over the merged doc lengths.

use crate::error::Result;
use crate::index::merge::MergeState;
use crate::index::postings::{IdListPostings, PostingsTable, TermFreqPostings};
use crate::index::reader::IndexPiece;
use crate::index::types::DocId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Doc lengths averaging above this count as long-form content
const LONG_CHUNK_THRESHOLD: f64 = 800.0;

/// BM25 ranking parameters derived from the merged doc lengths
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub avg_chunk_len: f64,
}

/// BM25 parameters for a doc-length distribution.
///
/// Long chunks get a lower `k1` and weaker length normalization.
pub fn compute_bm25(doc_lengths: &[u32]) -> Bm25Params {
    if doc_lengths.is_empty() {
        return Bm25Params {
            k1: 1.2,
            b: 0.75,
            avg_chunk_len: 0.0,
        };
    }
    let avg_chunk_len = mean(doc_lengths);
    if avg_chunk_len > LONG_CHUNK_THRESHOLD {
        Bm25Params {
            k1: 1.2,
            b: 0.6,
            avg_chunk_len,
        }
    } else {
        Bm25Params {
            k1: 1.7,
            b: 0.8,
            avg_chunk_len,
        }
    }
}

fn mean(values: &[u32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Finalized postings of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPostings {
    pub vocab: Vec<String>,
    pub postings: Vec<Vec<(DocId, u32)>>,
    pub doc_lengths: Vec<u32>,
    pub avg_doc_len: f64,
    pub total_docs: usize,
}

/// Everything the writer needs to emit the sparse and dense artifacts
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostingsBundle {
    pub k1: f64,
    pub b: f64,
    pub avg_chunk_len: f64,
    pub avg_doc_len: f64,
    pub total_docs: usize,
    pub total_tokens: u64,
    pub token_vocab: Vec<String>,
    pub token_postings: Vec<Vec<(DocId, u32)>>,
    pub doc_lengths: Vec<u32>,
    /// Fields ordered by name; fields without vocab or lengths are omitted
    pub field_postings: BTreeMap<String, FieldPostings>,
    pub phrase_vocab: Vec<String>,
    pub phrase_postings: Vec<Vec<DocId>>,
    pub chargram_vocab: Vec<String>,
    pub chargram_postings: Vec<Vec<DocId>>,
    pub minhash_sigs: Vec<Vec<u64>>,
    /// Zero when no piece contributed embeddings
    pub dims: u32,
    pub dense_vectors: Vec<Vec<u8>>,
    pub dense_vectors_doc: Vec<Vec<u8>>,
    pub dense_vectors_code: Vec<Vec<u8>>,
    pub dense_model: Option<String>,
    pub dense_scale: Option<f64>,
}

impl PostingsBundle {
    pub fn bm25(&self) -> Bm25Params {
        Bm25Params {
            k1: self.k1,
            b: self.b,
            avg_chunk_len: self.avg_chunk_len,
        }
    }

    pub fn has_embeddings(&self) -> bool {
        !self.dense_vectors.is_empty()
    }
}

/// Consume the postings side of the merge state into a [`PostingsBundle`].
///
/// Chunk-level data (chunks, call sites, relations) stays in `state`.
pub fn finalize(state: &mut MergeState) -> PostingsBundle {
    let doc_lengths = std::mem::take(&mut state.doc_lengths);
    let bm25 = compute_bm25(&doc_lengths);

    let (token_vocab, token_postings) = into_tf_lists(std::mem::take(&mut state.token_postings));
    let (phrase_vocab, phrase_postings) = into_id_lists(std::mem::take(&mut state.phrase_postings));
    let (chargram_vocab, chargram_postings) = into_id_lists(std::mem::take(&mut state.chargram_postings));

    let mut field_tables = std::mem::take(&mut state.field_postings);
    let mut field_lengths = state.field_doc_lengths.clone();
    let names: BTreeSet<String> = field_tables.keys().chain(field_lengths.keys()).cloned().collect();

    let mut field_postings = BTreeMap::new();
    for name in names {
        let (vocab, postings) = into_tf_lists(field_tables.remove(&name).unwrap_or_default());
        let doc_lengths = field_lengths.remove(&name).unwrap_or_default();
        if vocab.is_empty() && doc_lengths.is_empty() {
            continue;
        }
        let entry = FieldPostings {
            avg_doc_len: mean(&doc_lengths),
            total_docs: doc_lengths.len(),
            vocab,
            postings,
            doc_lengths,
        };
        field_postings.insert(name, entry);
    }

    let (dims, dense_vectors, dense_vectors_doc, dense_vectors_code, dense_model, dense_scale) =
        if state.embeddings_seen {
            let dense = std::mem::take(&mut state.dense);
            let doc = std::mem::take(&mut state.dense_doc);
            let code = std::mem::take(&mut state.dense_code);
            // Doc and code tables fall back to the generic table when never populated
            let doc = if doc.is_empty() { dense.clone() } else { doc };
            let code = if code.is_empty() { dense.clone() } else { code };
            let signature = state.dense_signature.clone();
            (
                signature.as_ref().map_or(0, |s| s.dims),
                dense,
                doc,
                code,
                signature.as_ref().and_then(|s| s.model.clone()),
                signature.and_then(|s| s.scale),
            )
        } else {
            (0, Vec::new(), Vec::new(), Vec::new(), None, None)
        };

    PostingsBundle {
        k1: bm25.k1,
        b: bm25.b,
        avg_chunk_len: bm25.avg_chunk_len,
        avg_doc_len: mean(&doc_lengths),
        total_docs: state.chunks.len(),
        total_tokens: state.total_tokens,
        token_vocab,
        token_postings,
        doc_lengths,
        field_postings,
        phrase_vocab,
        phrase_postings,
        chargram_vocab,
        chargram_postings,
        minhash_sigs: std::mem::take(&mut state.minhash),
        dims,
        dense_vectors,
        dense_vectors_doc,
        dense_vectors_code,
        dense_model,
        dense_scale,
    }
}

fn into_tf_lists(table: PostingsTable<TermFreqPostings>) -> (Vec<String>, Vec<Vec<(DocId, u32)>>) {
    let (vocab, lists) = table.finalize();
    (vocab, lists.into_iter().map(|p| p.0).collect())
}

fn into_id_lists(table: PostingsTable<IdListPostings>) -> (Vec<String>, Vec<Vec<DocId>>) {
    let (vocab, lists) = table.finalize();
    (vocab, lists.into_iter().map(|p| p.0).collect())
}

/// Display a summary of one index piece
pub fn show_piece_stats(dir: &Path, strict: bool) -> Result<()> {
    let piece = IndexPiece::open(dir, strict)?;

    let files: BTreeSet<&str> = piece.chunks.iter().filter_map(|c| c.file.as_deref()).collect();
    let stage = piece
        .index_state
        .as_ref()
        .and_then(|s| s.get("stage"))
        .and_then(|v| v.as_str())
        .unwrap_or("-");
    let bm25 = compute_bm25(&piece.token_postings.doc_lengths);

    println!("Index Piece");
    println!("===========");
    println!();
    println!("Location:          {}", piece.dir.display());
    println!("Compatibility key: {}", piece.compatibility_key.as_deref().unwrap_or("-"));
    println!("Stage:             {}", stage);
    println!("Chunks:            {}", piece.chunk_count());
    println!("Files:             {}", files.len());
    println!("Token vocab:       {}", piece.token_postings.vocab.len());
    println!(
        "BM25:              k1={} b={} avgChunkLen={:.2}",
        bm25.k1, bm25.b, bm25.avg_chunk_len
    );

    if let Some(fields) = &piece.field_postings {
        println!();
        println!("Fields:");
        for (name, table) in fields {
            println!("  {:15} {} term(s)", name, table.vocab.len());
        }
    }

    println!();
    if let Some(table) = &piece.phrase_ngrams {
        println!("Phrase n-grams:    {}", table.vocab.len());
    }
    if let Some(table) = &piece.chargrams {
        println!("Char n-grams:      {}", table.vocab.len());
    }
    if let Some(sigs) = &piece.minhash {
        println!("MinHash rows:      {}", sigs.len());
    }
    match &piece.dense {
        Some(dense) => println!(
            "Embeddings:        {} x {} ({})",
            dense.vectors.len(),
            dense.dims,
            dense.model.as_deref().unwrap_or("unknown model")
        ),
        None => println!("Embeddings:        none"),
    }
    if let Some(sites) = &piece.call_sites {
        println!("Call sites:        {}", sites.len());
    }

    Ok(())
}
