use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Position of a chunk in the document space of an index
pub type DocId = u32;

/// Version stamped onto assembled index state when a piece carries none
pub const ARTIFACT_SURFACE_VERSION: &str = "0.0.1";

/// Enrichment keys copied from file metadata onto chunks that lack them
pub const FILE_BACKFILL_KEYS: &[&str] = &[
    "externalDocs",
    "last_modified",
    "last_author",
    "churn",
    "churn_added",
    "churn_deleted",
    "churn_commits",
];

/// Ordered enrichment levels of an index piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Stage1,
    Stage2,
    Stage3,
    Stage4,
}

impl Stage {
    /// Parse the loose stage spellings found in index state and on the CLI
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "1" | "stage1" | "sparse" => Some(Stage::Stage1),
            "2" | "stage2" | "enrich" | "full" => Some(Stage::Stage2),
            "3" | "stage3" | "embeddings" | "embed" => Some(Stage::Stage3),
            "4" | "stage4" | "sqlite" | "ann" => Some(Stage::Stage4),
            _ => None,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Stage::Stage1 => 1,
            Stage::Stage2 => 2,
            Stage::Stage3 => 3,
            Stage::Stage4 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Stage1 => "stage1",
            Stage::Stage2 => "stage2",
            Stage::Stage3 => "stage3",
            Stage::Stage4 => "stage4",
        }
    }
}

/// Index mode; relation graphs are only built for code indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexMode {
    #[default]
    Code,
    Prose,
    ExtractedProse,
    Records,
}

impl IndexMode {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexMode::Code => "code",
            IndexMode::Prose => "prose",
            IndexMode::ExtractedProse => "extracted-prose",
            IndexMode::Records => "records",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "code" => Some(IndexMode::Code),
            "prose" => Some(IndexMode::Prose),
            "extracted-prose" => Some(IndexMode::ExtractedProse),
            "records" => Some(IndexMode::Records),
            _ => None,
        }
    }
}

/// One retrievable unit of an index.
///
/// Only the fields the merge engine reads are typed; every other enrichment
/// payload (docmeta, complexity, lint, blame, ...) rides along in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    #[serde(default)]
    pub id: DocId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash_algo: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chunk {
    /// Stable chunk UID, accepted inline or under `metaV2`
    pub fn uid(&self) -> Option<&str> {
        self.chunk_uid.as_deref().or_else(|| {
            self.extra
                .get("metaV2")
                .and_then(|meta| meta.get("chunkUid"))
                .and_then(Value::as_str)
        })
    }

    pub fn has_file(&self) -> bool {
        self.file.as_deref().is_some_and(|f| !f.is_empty())
    }

    /// Canonical sort key: `(file, start, end)`; the caller breaks ties.
    ///
    /// Paths compare by UTF-8 bytes (code point order). This differs from
    /// UTF-16 unit order only for paths mixing astral characters with
    /// U+E000..U+FFFF, and byte order is the canonical one.
    pub fn order_key(&self) -> (&str, u64, u64) {
        (
            self.file.as_deref().unwrap_or(""),
            self.start.unwrap_or(0),
            self.end.unwrap_or(0),
        )
    }

    pub fn cmp_canonical(&self, other: &Chunk) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// Row of a piece's `file_meta` table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, alias = "hash_algo", skip_serializing_if = "Option::is_none")]
    pub hash_algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_fallback: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_confidence: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMeta {
    /// File-level facts worth carrying to the writer, if any are known
    pub fn info(&self) -> Option<FileInfo> {
        let info = FileInfo {
            size: self.size,
            hash: self.hash.clone(),
            hash_algo: self.hash_algo.clone(),
            encoding: self.encoding.clone(),
            encoding_fallback: self.encoding_fallback,
            encoding_confidence: self.encoding_confidence,
        };
        (!info.is_empty()).then_some(info)
    }
}

/// Per-path file facts gathered across pieces (first piece wins)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_fallback: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_confidence: Option<f64>,
}

impl FileInfo {
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.hash.is_none()
            && self.hash_algo.is_none()
            && self.encoding.is_none()
            && self.encoding_fallback.is_none()
            && self.encoding_confidence.is_none()
    }
}

/// Caller → target edge between chunks, possibly crossing pieces
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_chunk_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_chunk_uid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Row of a piece's `file_relations` table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileRelation {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub relations: Option<Value>,
}

/// Quantized embedding rows of one vector table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseVectors {
    pub dims: u32,
    pub model: Option<String>,
    pub scale: Option<f64>,
    pub vectors: Vec<Vec<u8>>,
}

/// Term-frequency postings as stored in a piece: parallel vocab/postings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TermFreqTable {
    pub vocab: Vec<String>,
    pub postings: Vec<Vec<(DocId, u32)>>,
    pub doc_lengths: Vec<u32>,
}

/// Presence-only postings as stored in a piece
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IdListTable {
    pub vocab: Vec<String>,
    pub postings: Vec<Vec<DocId>>,
}

/// Repository provenance resolved for the assembled index
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoProvenance {
    pub provider: String,
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
}
