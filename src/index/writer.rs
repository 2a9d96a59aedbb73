use crate::error::{AssembleError, Result};
use crate::index::assemble::AssembledIndex;
use crate::index::reader::*;
use crate::index::stats::FieldPostings;
use crate::index::types::*;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Artifact holding the relation graphs of code indexes
pub const GRAPH_RELATIONS: &str = "graph_relations.json";

/// Persists an assembled index
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, out_dir: &Path, index: &AssembledIndex) -> Result<()>;
}

/// Writes the assembled index as JSON artifacts in the piece layout, so the
/// output can itself be fed back in as a piece.
///
/// Everything lands in a staging directory next to `out_dir` first; the
/// staging directory then replaces `out_dir` by rename.
#[derive(Debug, Clone, Default)]
pub struct JsonArtifactWriter {
    pretty: bool,
}

impl JsonArtifactWriter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn write_json<T: Serialize + ?Sized>(&self, dir: &Path, name: &str, value: &T) -> Result<()> {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AssembleError::io(parent, e))?;
        }
        let file = File::create(&path).map_err(|e| AssembleError::io(&path, e))?;
        let mut out = BufWriter::new(file);
        let written = if self.pretty {
            serde_json::to_writer_pretty(&mut out, value)
        } else {
            serde_json::to_writer(&mut out, value)
        };
        written.map_err(|e| AssembleError::malformed(&path, e))?;
        out.flush().map_err(|e| AssembleError::io(&path, e))?;
        Ok(())
    }

    fn write_all(&self, dir: &Path, index: &AssembledIndex) -> Result<Vec<&'static str>> {
        let postings = &index.postings;
        let mut written = Vec::new();

        let (chunks, file_rows) = file_table(index);
        self.write_json(dir, "chunk_meta.json", &chunks)?;
        written.push("chunk_meta.json");
        self.write_json(dir, "file_meta.json", &file_rows)?;
        written.push("file_meta.json");

        self.write_json(
            dir,
            TOKEN_POSTINGS,
            &TokenPostingsFile {
                vocab: &postings.token_vocab,
                postings: &postings.token_postings,
                doc_lengths: &postings.doc_lengths,
                avg_doc_len: postings.avg_doc_len,
                avg_chunk_len: postings.avg_chunk_len,
                k1: postings.k1,
                b: postings.b,
                total_docs: postings.total_docs,
                total_tokens: postings.total_tokens,
            },
        )?;
        written.push(TOKEN_POSTINGS);

        if !postings.field_postings.is_empty() {
            self.write_json(dir, FIELD_POSTINGS, &FieldPostingsFile { fields: &postings.field_postings })?;
            written.push(FIELD_POSTINGS);
        }
        if let Some(tokens) = &index.field_tokens {
            self.write_json(dir, "field_tokens.json", tokens)?;
            written.push("field_tokens.json");
        }
        if !postings.phrase_vocab.is_empty() {
            self.write_json(
                dir,
                PHRASE_NGRAMS,
                &IdPostingsFile {
                    vocab: &postings.phrase_vocab,
                    postings: &postings.phrase_postings,
                },
            )?;
            written.push(PHRASE_NGRAMS);
        }
        if !postings.chargram_vocab.is_empty() {
            self.write_json(
                dir,
                CHARGRAMS,
                &IdPostingsFile {
                    vocab: &postings.chargram_vocab,
                    postings: &postings.chargram_postings,
                },
            )?;
            written.push(CHARGRAMS);
        }
        if !postings.minhash_sigs.is_empty() {
            self.write_json(dir, MINHASH, &json!({ "signatures": postings.minhash_sigs }))?;
            written.push(MINHASH);
        }

        if postings.has_embeddings() {
            let tables = [
                (DENSE_VECTORS, &postings.dense_vectors),
                (DENSE_VECTORS_DOC, &postings.dense_vectors_doc),
                (DENSE_VECTORS_CODE, &postings.dense_vectors_code),
            ];
            for (name, vectors) in tables {
                let file = DenseFile {
                    dims: postings.dims,
                    model: postings.dense_model.as_deref(),
                    scale: postings.dense_scale,
                    vectors,
                };
                self.write_json(dir, name, &file)?;
                written.push(name);
            }
        }

        let relations: Vec<Value> = index
            .file_relations
            .iter()
            .map(|(file, relations)| json!({ "file": file, "relations": relations }))
            .collect();
        self.write_json(dir, "file_relations.json", &relations)?;
        written.push("file_relations.json");

        self.write_json(dir, "call_sites.json", &index.call_sites)?;
        written.push("call_sites.json");

        if let Some(graphs) = &index.graphs {
            self.write_json(dir, GRAPH_RELATIONS, graphs)?;
            written.push(GRAPH_RELATIONS);
        }

        self.write_json(dir, INDEX_STATE, &index.index_state)?;
        written.push(INDEX_STATE);

        Ok(written)
    }
}

impl ArtifactWriter for JsonArtifactWriter {
    fn write(&self, out_dir: &Path, index: &AssembledIndex) -> Result<()> {
        let staging = sibling(out_dir, "staging");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| AssembleError::io(&staging, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| AssembleError::io(&staging, e))?;

        let written = match self.write_all(&staging, index) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let mut manifest_fields = serde_json::Map::new();
        manifest_fields.insert(
            "compatibilityKey".into(),
            index.compatibility_key.as_deref().map_or(Value::Null, Value::from),
        );
        manifest_fields.insert("mode".into(), Value::from(index.mode.as_str()));
        if let Some(repo) = &index.provenance {
            manifest_fields.insert("repo".into(), serde_json::to_value(repo).unwrap_or(Value::Null));
        }
        let manifest = json!({ "fields": manifest_fields, "pieces": written });
        self.write_json(&staging, MANIFEST_PATH, &manifest)?;

        let previous = sibling(out_dir, "previous");
        if out_dir.exists() {
            if previous.exists() {
                fs::remove_dir_all(&previous).map_err(|e| AssembleError::io(&previous, e))?;
            }
            fs::rename(out_dir, &previous).map_err(|e| AssembleError::io(out_dir, e))?;
        }
        if let Err(e) = fs::rename(&staging, out_dir) {
            // Put the old output back before reporting
            if previous.exists() {
                let _ = fs::rename(&previous, out_dir);
            }
            return Err(AssembleError::io(out_dir, e));
        }
        if previous.exists() {
            if let Err(e) = fs::remove_dir_all(&previous) {
                tracing::warn!("Failed to remove previous output {}: {}", previous.display(), e);
            }
        }

        tracing::debug!("Wrote {} artifact(s) to {}", written.len() + 1, out_dir.display());
        Ok(())
    }
}

/// `<out>.<suffix>` next to the output directory
fn sibling(out_dir: &Path, suffix: &str) -> PathBuf {
    let mut name = out_dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{suffix}"));
    out_dir.with_file_name(name)
}

/// Chunks with output file ids, plus the matching `file_meta` rows.
///
/// File ids follow sorted path order, so they are stable across shard counts.
fn file_table(index: &AssembledIndex) -> (Vec<Chunk>, Vec<FileMeta>) {
    let mut files: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for chunk in &index.chunks {
        if let Some(file) = chunk.file.as_deref() {
            let ext = files.entry(file).or_default();
            if ext.is_none() {
                *ext = chunk.ext.as_deref();
            }
        }
    }
    for file in index.file_info.keys() {
        files.entry(file.as_str()).or_default();
    }

    let ids: BTreeMap<&str, u32> = files.keys().enumerate().map(|(i, f)| (*f, i as u32)).collect();

    let rows = files
        .iter()
        .map(|(&file, ext)| {
            let info = index.file_info.get(file).cloned().unwrap_or_default();
            FileMeta {
                id: ids.get(file).copied(),
                file: Some(file.to_string()),
                ext: ext.map(str::to_string),
                size: info.size,
                hash: info.hash,
                hash_algo: info.hash_algo,
                encoding: info.encoding,
                encoding_fallback: info.encoding_fallback,
                encoding_confidence: info.encoding_confidence,
                extra: Default::default(),
            }
        })
        .collect();

    let chunks = index
        .chunks
        .iter()
        .map(|chunk| {
            let mut chunk = chunk.clone();
            chunk.file_id = chunk.file.as_deref().and_then(|f| ids.get(f).copied());
            chunk
        })
        .collect();

    (chunks, rows)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenPostingsFile<'a> {
    vocab: &'a [String],
    postings: &'a [Vec<(DocId, u32)>],
    doc_lengths: &'a [u32],
    avg_doc_len: f64,
    avg_chunk_len: f64,
    k1: f64,
    b: f64,
    total_docs: usize,
    total_tokens: u64,
}

#[derive(Serialize)]
struct FieldPostingsFile<'a> {
    fields: &'a BTreeMap<String, FieldPostings>,
}

#[derive(Serialize)]
struct IdPostingsFile<'a> {
    vocab: &'a [String],
    postings: &'a [Vec<DocId>],
}

#[derive(Serialize)]
struct DenseFile<'a> {
    dims: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scale: Option<f64>,
    vectors: &'a [Vec<u8>],
}
