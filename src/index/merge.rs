//! Fold loaded pieces into one accumulation-ordered document space.

use crate::error::{AssembleError, Result};
use crate::index::postings::{DocPostings, IdListPostings, PostingsTable, TermFreqPostings};
use crate::index::reader::IndexPiece;
use crate::index::types::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Dense table metadata fixed by the first piece that contributes embeddings
#[derive(Debug, Clone, PartialEq)]
pub struct DenseSignature {
    pub dims: u32,
    pub model: Option<String>,
    pub scale: Option<f64>,
    pub source: PathBuf,
}

/// Index state descriptor of one input, kept for stage selection
#[derive(Debug, Clone)]
pub struct StageInput {
    pub dir: PathBuf,
    pub index_state: Option<Map<String, Value>>,
    pub chunk_count: usize,
}

/// Accumulator for one assembly.
///
/// Owned by the orchestrator for the duration of a single call; pieces are
/// folded in sorted directory order and doc ids are offset by the number of
/// chunks already accumulated.
#[derive(Debug, Default)]
pub struct MergeState {
    pub chunks: Vec<Chunk>,
    pub doc_lengths: Vec<u32>,
    pub total_tokens: u64,
    pub token_postings: PostingsTable<TermFreqPostings>,
    pub field_postings: BTreeMap<String, PostingsTable<TermFreqPostings>>,
    pub field_doc_lengths: BTreeMap<String, Vec<u32>>,
    /// Per-doc field tokens, present once any piece supplied them
    pub field_tokens: Option<Vec<Value>>,
    pub phrase_postings: PostingsTable<IdListPostings>,
    pub chargram_postings: PostingsTable<IdListPostings>,
    pub minhash: Vec<Vec<u64>>,
    pub dense: Vec<Vec<u8>>,
    pub dense_doc: Vec<Vec<u8>>,
    pub dense_code: Vec<Vec<u8>>,
    pub dense_signature: Option<DenseSignature>,
    pub embeddings_seen: bool,
    pub file_relations: BTreeMap<String, Value>,
    pub file_info: BTreeMap<String, FileInfo>,
    pub call_sites: Vec<CallSite>,
    pub stage_inputs: Vec<StageInput>,
    /// Postings entries dropped because they pointed outside their piece
    pub foreign_postings: usize,
}

impl MergeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_count(&self) -> usize {
        self.chunks.len()
    }

    /// Append one piece. Validation happens before any state is touched, so a
    /// rejected piece never contaminates the accumulator.
    pub fn fold(&mut self, piece: IndexPiece) -> Result<()> {
        self.validate(&piece)?;

        let IndexPiece {
            dir,
            chunks,
            token_postings,
            field_postings,
            field_tokens,
            minhash,
            phrase_ngrams,
            chargrams,
            dense,
            dense_doc,
            dense_code,
            file_relations,
            call_sites,
            index_state,
            file_info,
            ..
        } = piece;

        let count = chunks.len();
        let limit = count as DocId;
        let offset = self.chunks.len() as DocId;

        self.stage_inputs.push(StageInput {
            dir: dir.clone(),
            index_state,
            chunk_count: count,
        });

        // Chunks take global ids; piece-local file ids mean nothing past here
        for (i, mut chunk) in chunks.into_iter().enumerate() {
            chunk.id = offset + i as DocId;
            chunk.file_id = None;
            self.chunks.push(chunk);
        }

        self.total_tokens += token_postings.doc_lengths.iter().map(|&len| len as u64).sum::<u64>();
        self.doc_lengths.extend_from_slice(&token_postings.doc_lengths);

        self.foreign_postings += merge_tf_table(&mut self.token_postings, token_postings, offset, limit);

        if let Some(fields) = field_postings {
            for (field, table) in fields {
                self.field_doc_lengths
                    .entry(field.clone())
                    .or_default()
                    .extend_from_slice(&table.doc_lengths);
                let dest = self.field_postings.entry(field).or_default();
                self.foreign_postings += merge_tf_table(dest, table, offset, limit);
            }
        }

        self.fold_field_tokens(field_tokens, offset as usize, count);

        if let Some(table) = phrase_ngrams {
            self.foreign_postings += merge_id_table(&mut self.phrase_postings, table, offset, limit);
        }
        if let Some(table) = chargrams {
            self.foreign_postings += merge_id_table(&mut self.chargram_postings, table, offset, limit);
        }

        if let Some(signatures) = minhash {
            self.minhash.extend(signatures);
        }

        if let Some(dense) = dense {
            self.embeddings_seen = true;
            if self.dense_signature.is_none() {
                self.dense_signature = Some(DenseSignature {
                    dims: dense.dims,
                    model: dense.model.clone(),
                    scale: dense.scale,
                    source: dir.clone(),
                });
            }
            if let Some(signature) = self.dense_signature.as_mut() {
                // Later pieces may fill in metadata the first one left blank
                if signature.dims == 0 {
                    signature.dims = dense.dims;
                }
                if signature.model.is_none() {
                    signature.model = dense.model;
                }
                if signature.scale.is_none() {
                    signature.scale = dense.scale;
                }
            }
            self.dense.extend(dense.vectors);
            if let Some(doc) = dense_doc {
                self.dense_doc.extend(doc.vectors);
            }
            if let Some(code) = dense_code {
                self.dense_code.extend(code.vectors);
            }
        }

        for relation in file_relations.into_iter().flatten() {
            let Some(file) = relation.file else { continue };
            self.file_relations
                .entry(file)
                .or_insert_with(|| relation.relations.unwrap_or(Value::Null));
        }

        for (file, info) in file_info {
            self.file_info.entry(file).or_insert(info);
        }

        self.call_sites.extend(call_sites.into_iter().flatten());

        tracing::debug!(
            "Folded {} chunk(s) from {} at offset {}",
            count,
            dir.display(),
            offset
        );
        Ok(())
    }

    fn fold_field_tokens(&mut self, field_tokens: Option<Vec<Value>>, offset: usize, count: usize) {
        match field_tokens {
            Some(rows) if !rows.is_empty() => {
                // Docs from earlier pieces without field tokens read as null
                let tokens = self.field_tokens.get_or_insert_with(|| vec![Value::Null; offset]);
                tokens.extend(rows);
            }
            _ => {
                if let Some(tokens) = self.field_tokens.as_mut() {
                    tokens.extend(std::iter::repeat_n(Value::Null, count));
                }
            }
        }
    }

    /// Reject a piece whose per-doc arrays disagree with its chunk count, or
    /// whose embeddings disagree with earlier pieces
    fn validate(&self, piece: &IndexPiece) -> Result<()> {
        let expected = piece.chunks.len();
        let dir = &piece.dir;

        validate_length("docLengths", piece.token_postings.doc_lengths.len(), expected, dir)?;

        if let Some(fields) = &piece.field_postings {
            for (field, table) in fields {
                validate_length(&format!("fieldDocLengths:{field}"), table.doc_lengths.len(), expected, dir)?;
            }
        }
        if let Some(tokens) = &piece.field_tokens {
            validate_length("fieldTokens", tokens.len(), expected, dir)?;
        }
        if let Some(signatures) = &piece.minhash {
            validate_length("minhash", signatures.len(), expected, dir)?;
        }

        if let Some(dense) = &piece.dense {
            if let Some(signature) = &self.dense_signature {
                check_dense_signature(signature, dense, dir)?;
            }
            validate_length("dense vectors", dense.vectors.len(), expected, dir)?;
            if let Some(doc) = &piece.dense_doc {
                validate_length("dense doc vectors", doc.vectors.len(), expected, dir)?;
            }
            if let Some(code) = &piece.dense_code {
                validate_length("dense code vectors", code.vectors.len(), expected, dir)?;
            }
        }
        Ok(())
    }
}

/// Fail unless `actual == expected`
pub fn validate_length(label: &str, actual: usize, expected: usize, dir: &Path) -> Result<()> {
    if actual != expected {
        return Err(AssembleError::LengthMismatch {
            label: label.to_string(),
            actual,
            expected,
            dir: dir.to_path_buf(),
        });
    }
    Ok(())
}

fn check_dense_signature(signature: &DenseSignature, dense: &DenseVectors, dir: &Path) -> Result<()> {
    let mismatch = |property: &'static str, expected: String, actual: String| AssembleError::EmbeddingMismatch {
        property,
        expected,
        actual,
        expected_dir: signature.source.clone(),
        actual_dir: dir.to_path_buf(),
    };

    if signature.dims != 0 && dense.dims != 0 && signature.dims != dense.dims {
        return Err(mismatch("dims", signature.dims.to_string(), dense.dims.to_string()));
    }
    if let (Some(expected), Some(actual)) = (&signature.model, &dense.model) {
        if expected != actual {
            return Err(mismatch("model", expected.clone(), actual.clone()));
        }
    }
    if let (Some(expected), Some(actual)) = (signature.scale, dense.scale) {
        if expected != actual {
            return Err(mismatch("scale", expected.to_string(), actual.to_string()));
        }
    }
    Ok(())
}

fn merge_tf_table(
    dest: &mut PostingsTable<TermFreqPostings>,
    table: TermFreqTable,
    offset: DocId,
    limit: DocId,
) -> usize {
    let mut dropped = 0;
    for (term, list) in table.vocab.into_iter().zip(table.postings) {
        let mut postings = TermFreqPostings(list);
        dropped += postings.retain_below(limit);
        dest.merge(term, postings, offset);
    }
    dropped
}

fn merge_id_table(dest: &mut PostingsTable<IdListPostings>, table: IdListTable, offset: DocId, limit: DocId) -> usize {
    let mut dropped = 0;
    for (term, list) in table.vocab.into_iter().zip(table.postings) {
        let mut postings = IdListPostings(list);
        dropped += postings.retain_below(limit);
        dest.merge(term, postings, offset);
    }
    dropped
}
