use crate::error::{AssembleError, Result};
use crate::index::artifact::{
    lenient_u32_list, load_array, load_object, load_optional_array, load_optional_object, ArtifactObject,
};
use crate::index::postings::{decode_id_list, decode_tf_list};
use crate::index::types::*;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_PATH: &str = "pieces/manifest.json";
pub const CHUNK_META: &str = "chunk_meta";
pub const FILE_META: &str = "file_meta";
pub const TOKEN_POSTINGS: &str = "token_postings.json";
pub const FIELD_POSTINGS: &str = "field_postings.json";
pub const FIELD_TOKENS: &str = "field_tokens";
pub const MINHASH: &str = "minhash_signatures.json";
pub const PHRASE_NGRAMS: &str = "phrase_ngrams.json";
pub const CHARGRAMS: &str = "chargram_postings.json";
pub const DENSE_VECTORS: &str = "dense_vectors_uint8.json";
pub const DENSE_VECTORS_DOC: &str = "dense_vectors_doc_uint8.json";
pub const DENSE_VECTORS_CODE: &str = "dense_vectors_code_uint8.json";
pub const FILE_RELATIONS: &str = "file_relations";
pub const CALL_SITES: &str = "call_sites";
pub const INDEX_STATE: &str = "index_state.json";

/// Everything one index piece contributes to an assembly
#[derive(Debug, Clone, Default)]
pub struct IndexPiece {
    pub dir: PathBuf,
    pub chunks: Vec<Chunk>,
    pub token_postings: TermFreqTable,
    /// Per-field postings, ordered by field name
    pub field_postings: Option<BTreeMap<String, TermFreqTable>>,
    pub field_tokens: Option<Vec<Value>>,
    pub minhash: Option<Vec<Vec<u64>>>,
    pub phrase_ngrams: Option<IdListTable>,
    pub chargrams: Option<IdListTable>,
    pub dense: Option<DenseVectors>,
    pub dense_doc: Option<DenseVectors>,
    pub dense_code: Option<DenseVectors>,
    pub file_relations: Option<Vec<FileRelation>>,
    pub call_sites: Option<Vec<CallSite>>,
    pub index_state: Option<Map<String, Value>>,
    pub compatibility_key: Option<String>,
    pub file_info: BTreeMap<String, FileInfo>,
}

impl IndexPiece {
    /// Load a piece directory.
    ///
    /// Chunks lacking `file` or `ext` are completed from `file_meta` by their
    /// piece-local `fileId`; a chunk still without a file fails the load.
    pub fn open(dir: &Path, strict: bool) -> Result<Self> {
        if !dir.is_dir() {
            return Err(AssembleError::MissingInputDir {
                dir: dir.to_path_buf(),
            });
        }

        let manifest = load_manifest(dir, strict)?;
        let index_state = load_optional_object(dir, INDEX_STATE, strict)?.map(unwrap_fields);
        let compatibility_key = resolve_compatibility_key(dir, manifest.as_ref(), index_state.as_ref(), strict)?;

        let mut chunks: Vec<Chunk> = load_array(dir, CHUNK_META)?.ok_or_else(|| AssembleError::MissingArtifact {
            dir: dir.to_path_buf(),
            name: CHUNK_META.to_string(),
        })?;

        // file_meta is optional on its own; backfill decides whether it was needed
        let file_meta: Vec<FileMeta> = load_optional_array(dir, FILE_META, strict)?.unwrap_or_default();
        let file_info = backfill_chunks(&mut chunks, &file_meta);

        let missing = chunks.iter().filter(|c| !c.has_file()).count();
        if missing > 0 {
            return Err(AssembleError::MissingFileMetadata {
                dir: dir.to_path_buf(),
                missing,
            });
        }

        let token_postings = decode_tf_table(&load_object(dir, TOKEN_POSTINGS)?);

        let field_postings = load_optional_object(dir, FIELD_POSTINGS, strict)?.map(|obj| {
            let path = obj.path().to_path_buf();
            unwrap_fields(obj)
                .into_iter()
                .filter_map(|(field, entry)| match entry {
                    Value::Object(map) => Some((field, decode_tf_table(&ArtifactObject::new(&path, map)))),
                    _ => None,
                })
                .collect::<BTreeMap<_, _>>()
        });

        let minhash = match load_optional_object(dir, MINHASH, strict)? {
            Some(obj) => Some(obj.array::<Vec<u64>>("signatures")?),
            None => None,
        };

        let dense = load_optional_object(dir, DENSE_VECTORS, strict)?
            .map(|obj| decode_dense(&obj))
            .transpose()?;
        let dense_doc = load_optional_object(dir, DENSE_VECTORS_DOC, strict)?
            .map(|obj| decode_dense(&obj))
            .transpose()?;
        let dense_code = load_optional_object(dir, DENSE_VECTORS_CODE, strict)?
            .map(|obj| decode_dense(&obj))
            .transpose()?;

        Ok(Self {
            dir: dir.to_path_buf(),
            chunks,
            token_postings,
            field_postings,
            field_tokens: load_optional_array(dir, FIELD_TOKENS, strict)?,
            minhash,
            phrase_ngrams: load_optional_object(dir, PHRASE_NGRAMS, strict)?.map(|obj| decode_id_table(&obj)),
            chargrams: load_optional_object(dir, CHARGRAMS, strict)?.map(|obj| decode_id_table(&obj)),
            dense,
            dense_doc,
            dense_code,
            file_relations: load_optional_array(dir, FILE_RELATIONS, strict)?,
            call_sites: load_optional_array(dir, CALL_SITES, strict)?,
            index_state,
            compatibility_key,
            file_info,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Read only the compatibility key of a piece, without loading its artifacts
pub fn read_compatibility_key(dir: &Path, strict: bool) -> Result<Option<String>> {
    if !dir.is_dir() {
        return Err(AssembleError::MissingInputDir {
            dir: dir.to_path_buf(),
        });
    }
    let manifest = load_manifest(dir, strict)?;
    let state = load_optional_object(dir, INDEX_STATE, strict)?.map(unwrap_fields);
    resolve_compatibility_key(dir, manifest.as_ref(), state.as_ref(), strict)
}

fn load_manifest(dir: &Path, strict: bool) -> Result<Option<ArtifactObject>> {
    if strict {
        return load_object(dir, MANIFEST_PATH).map(Some);
    }
    let manifest = load_optional_object(dir, MANIFEST_PATH, false)?;
    if manifest.is_none() {
        tracing::warn!(
            "Non-strict mode: missing pieces manifest in {}; using index_state only",
            dir.display()
        );
    }
    Ok(manifest)
}

fn resolve_compatibility_key(
    dir: &Path,
    manifest: Option<&ArtifactObject>,
    state: Option<&Map<String, Value>>,
    strict: bool,
) -> Result<Option<String>> {
    let from_manifest = match manifest {
        Some(obj) => obj.field::<String>("compatibilityKey")?,
        None => None,
    };
    let key = from_manifest
        .or_else(|| {
            state
                .and_then(|s| s.get("compatibilityKey"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

    if key.is_none() && strict {
        return Err(AssembleError::MissingCompatibilityKey {
            dir: dir.to_path_buf(),
        });
    }
    Ok(key)
}

/// Complete chunk file fields from `file_meta`, returning per-path file info
fn backfill_chunks(chunks: &mut [Chunk], file_meta: &[FileMeta]) -> BTreeMap<String, FileInfo> {
    let mut by_id: FxHashMap<u32, &FileMeta> = FxHashMap::default();
    let mut file_info = BTreeMap::new();
    for meta in file_meta {
        if let Some(id) = meta.id {
            by_id.insert(id, meta);
        }
        if let (Some(file), Some(info)) = (&meta.file, meta.info()) {
            file_info.entry(file.clone()).or_insert(info);
        }
    }

    for chunk in chunks.iter_mut() {
        if chunk.has_file() && chunk.ext.is_some() {
            continue;
        }
        let Some(meta) = chunk.file_id.and_then(|id| by_id.get(&id)) else {
            continue;
        };
        if !chunk.has_file() {
            chunk.file = meta.file.clone();
        }
        if chunk.ext.is_none() {
            chunk.ext = meta.ext.clone();
        }
        if chunk.file_size.is_none() {
            chunk.file_size = meta.size;
        }
        if chunk.file_hash.is_none() {
            chunk.file_hash = meta.hash.clone();
        }
        if chunk.file_hash_algo.is_none() {
            chunk.file_hash_algo = meta.hash_algo.clone();
        }
        for &key in FILE_BACKFILL_KEYS {
            let present = chunk.extra.get(key).is_some_and(|v| !v.is_null());
            if present {
                continue;
            }
            if let Some(value) = meta.extra.get(key).filter(|v| !v.is_null()) {
                chunk.extra.insert(key.to_string(), value.clone());
            }
        }
    }

    file_info
}

fn decode_tf_table(obj: &ArtifactObject) -> TermFreqTable {
    let vocab = obj.array_value("vocab").map(Vec::as_slice).unwrap_or_default();
    let postings = obj.array_value("postings").map(Vec::as_slice).unwrap_or_default();
    let doc_lengths = obj
        .array_value("docLengths")
        .map(|v| lenient_u32_list(v))
        .unwrap_or_default();

    let mut table = TermFreqTable {
        doc_lengths,
        ..Default::default()
    };
    for (term, list) in vocab.iter().zip(postings) {
        let (Some(term), true) = (term.as_str(), list.is_array()) else {
            continue;
        };
        table.vocab.push(term.to_string());
        table.postings.push(decode_tf_list(list));
    }
    table
}

fn decode_id_table(obj: &ArtifactObject) -> IdListTable {
    let vocab = obj.array_value("vocab").map(Vec::as_slice).unwrap_or_default();
    let postings = obj.array_value("postings").map(Vec::as_slice).unwrap_or_default();

    let mut table = IdListTable::default();
    for (term, list) in vocab.iter().zip(postings) {
        let (Some(term), true) = (term.as_str(), list.is_array()) else {
            continue;
        };
        table.vocab.push(term.to_string());
        table.postings.push(decode_id_list(list));
    }
    table
}

fn decode_dense(obj: &ArtifactObject) -> Result<DenseVectors> {
    let dims = obj
        .field_value("dims")
        .and_then(Value::as_f64)
        .filter(|d| d.is_finite() && *d > 0.0)
        .map_or(0, |d| d as u32);
    Ok(DenseVectors {
        dims,
        model: obj.field::<String>("model")?,
        scale: obj.field_value("scale").and_then(Value::as_f64),
        vectors: obj.array::<Vec<u8>>("vectors")?,
    })
}

/// Strip a `{"fields": {...}}` wrapper when one is present
fn unwrap_fields(obj: ArtifactObject) -> Map<String, Value> {
    let mut map = obj.into_inner();
    match map.remove("fields") {
        Some(Value::Object(fields)) => fields,
        Some(other) => {
            map.insert("fields".to_string(), other);
            map
        }
        None => map,
    }
}
