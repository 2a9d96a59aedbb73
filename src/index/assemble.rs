//! Assembly orchestrator.
//!
//! Drives one assembly from a set of piece directories to a written index:
//!
//! 1. lock the output, resolve provenance, sort the inputs
//! 2. check that every piece shares one compatibility key
//! 3. load pieces (in parallel) and fold them (serially, in sorted order)
//! 4. reorder into canonical chunk order and run cross-file enrichment
//! 5. finalize postings, filter call sites, build graphs and index state
//! 6. hand the result to the [`ArtifactWriter`]
//!
//! Every fatal error is raised before step 6, so a failed assembly leaves the
//! output directory untouched.

use crate::error::{AssembleError, Result};
use crate::index::graphs::{CallSiteGraphBuilder, RelationGraphBuilder, RelationGraphs};
use crate::index::merge::{validate_length, MergeState};
use crate::index::ordering::apply_canonical_order;
use crate::index::reader::{read_compatibility_key, IndexPiece};
use crate::index::state::{pick_base_state, synthesize_index_state, StateOverrides};
use crate::index::stats::{finalize, Bm25Params, PostingsBundle};
use crate::index::types::*;
use crate::index::writer::{ArtifactWriter, JsonArtifactWriter};
use crate::utils::progress::counting_bar;
use crate::utils::provenance::{resolve_or_warn, GitProvenance, ProvenanceProvider};
use crate::utils::{AppConfig, IndexLock};
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// What the cross-file enrichment pass gets to see and change
pub struct EnrichmentRequest<'a> {
    pub root: &'a Path,
    /// Chunks in canonical order; enrichers mutate payloads in place
    pub chunks: &'a mut [Chunk],
    pub file_relations: &'a BTreeMap<String, Value>,
    pub enable_type_inference: bool,
    pub enable_risk_correlation: bool,
}

/// Cross-file type inference and risk correlation over the merged chunks
pub trait CrossFileEnricher: Send + Sync {
    fn enrich(&self, request: EnrichmentRequest<'_>) -> Result<()>;
}

/// Enricher that leaves chunks as they are
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnrichment;

impl CrossFileEnricher for NoEnrichment {
    fn enrich(&self, _request: EnrichmentRequest<'_>) -> Result<()> {
        Ok(())
    }
}

/// The assembled index, as handed to the writer
#[derive(Debug, Clone, Default)]
pub struct AssembledIndex {
    pub mode: IndexMode,
    pub compatibility_key: Option<String>,
    /// Chunks in canonical order, ids equal to positions
    pub chunks: Vec<Chunk>,
    pub field_tokens: Option<Vec<Value>>,
    pub postings: PostingsBundle,
    /// Only built for code indexes
    pub graphs: Option<RelationGraphs>,
    pub index_state: Map<String, Value>,
    pub provenance: Option<RepoProvenance>,
    /// Call sites whose endpoints both resolve to a chunk
    pub call_sites: Vec<CallSite>,
    pub file_relations: BTreeMap<String, Value>,
    pub file_info: BTreeMap<String, FileInfo>,
}

/// Summary of one assembly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyReport {
    pub pieces: usize,
    pub chunks: usize,
    pub files: usize,
    /// Whether canonical order differed from accumulation order
    pub remapped: bool,
    pub dropped_call_sites: usize,
    pub foreign_postings: usize,
    pub bm25: Bm25Params,
    pub out_dir: PathBuf,
}

/// Parameters of one assembly
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub inputs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    /// Repository root, for provenance and enrichment
    pub root: PathBuf,
    pub mode: IndexMode,
    /// Stage to stamp on the output instead of the inputs' highest stage
    pub stage: Option<Stage>,
    pub config: AppConfig,
    /// Fixed timestamp for reproducible output; defaults to now
    pub generated_at: Option<DateTime<Utc>>,
    pub show_progress: bool,
}

impl AssembleOptions {
    pub fn new(inputs: Vec<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            out_dir: out_dir.into(),
            root: PathBuf::from("."),
            mode: IndexMode::default(),
            stage: None,
            config: AppConfig::default(),
            generated_at: None,
            show_progress: false,
        }
    }
}

/// Assembles index pieces with pluggable collaborators
pub struct Assembler {
    provenance: Box<dyn ProvenanceProvider>,
    enricher: Box<dyn CrossFileEnricher>,
    graph_builder: Box<dyn RelationGraphBuilder>,
    writer: Box<dyn ArtifactWriter>,
}

impl Assembler {
    /// Git provenance, no enrichment, default graphs and JSON output
    pub fn new(config: &AppConfig) -> Self {
        Self {
            provenance: Box::new(GitProvenance),
            enricher: Box::new(NoEnrichment),
            graph_builder: Box::new(CallSiteGraphBuilder),
            writer: Box::new(JsonArtifactWriter::new(config.pretty_json)),
        }
    }

    pub fn with_provenance(mut self, provider: impl ProvenanceProvider + 'static) -> Self {
        self.provenance = Box::new(provider);
        self
    }

    pub fn with_enricher(mut self, enricher: impl CrossFileEnricher + 'static) -> Self {
        self.enricher = Box::new(enricher);
        self
    }

    pub fn with_graph_builder(mut self, builder: impl RelationGraphBuilder + 'static) -> Self {
        self.graph_builder = Box::new(builder);
        self
    }

    pub fn with_writer(mut self, writer: impl ArtifactWriter + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    /// Assemble and write, holding the output lock throughout
    pub fn assemble(&self, options: &AssembleOptions) -> Result<AssemblyReport> {
        let _lock = IndexLock::acquire(&options.out_dir)?;

        let (index, report) = self.build(options)?;
        self.writer.write(&options.out_dir, &index)?;

        tracing::info!(
            "Assembled index from {} piece set(s) into {}.",
            report.pieces,
            options.out_dir.display()
        );
        Ok(report)
    }

    /// Run every step short of writing
    pub fn build(&self, options: &AssembleOptions) -> Result<(AssembledIndex, AssemblyReport)> {
        if options.inputs.is_empty() {
            return Err(AssembleError::NoInputs);
        }
        let strict = options.config.strict;

        let provenance = resolve_or_warn(self.provenance.as_ref(), &options.root);

        let inputs = sorted_inputs(&options.inputs)?;
        tracing::info!(
            "Assembling {} piece set(s) into {}",
            inputs.len(),
            options.out_dir.display()
        );

        let compatibility_key = check_compatibility(&inputs, strict)?;

        let mut state = MergeState::new();
        for piece in load_pieces(&inputs, &options.config, options.show_progress) {
            state.fold(piece?)?;
        }
        if state.chunks.is_empty() {
            return Err(AssembleError::NoChunks);
        }

        let remapped = apply_canonical_order(&mut state);

        self.run_enrichment(&mut state, options)?;

        validate_merged_lengths(&state, &options.out_dir)?;

        let postings = finalize(&mut state);

        let (call_sites, dropped_call_sites) = filter_call_sites(&state.chunks, std::mem::take(&mut state.call_sites));
        if dropped_call_sites > 0 {
            tracing::warn!("Dropped {} call site(s) with unresolved endpoints", dropped_call_sites);
        }
        if state.foreign_postings > 0 {
            tracing::warn!(
                "Dropped {} postings entr(ies) referencing docs outside their piece",
                state.foreign_postings
            );
        }

        let graphs = (options.mode == IndexMode::Code)
            .then(|| self.graph_builder.build(&state.chunks, &call_sites, &state.file_relations));

        let overrides = StateOverrides {
            compatibility_key: compatibility_key.as_deref(),
            mode: options.mode,
            stage: options.stage,
            chunk_count: state.chunks.len(),
            generated_at: options.generated_at.unwrap_or_else(Utc::now),
        };
        let index_state = synthesize_index_state(pick_base_state(&state.stage_inputs), &overrides);

        let files: BTreeSet<&str> = state.chunks.iter().filter_map(|c| c.file.as_deref()).collect();
        let report = AssemblyReport {
            pieces: inputs.len(),
            chunks: state.chunks.len(),
            files: files.len(),
            remapped,
            dropped_call_sites,
            foreign_postings: state.foreign_postings,
            bm25: postings.bm25(),
            out_dir: options.out_dir.clone(),
        };

        let MergeState {
            chunks,
            field_tokens,
            file_relations,
            file_info,
            ..
        } = state;

        let index = AssembledIndex {
            mode: options.mode,
            compatibility_key,
            chunks,
            field_tokens,
            postings,
            graphs,
            index_state,
            provenance,
            call_sites,
            file_relations,
            file_info,
        };
        Ok((index, report))
    }

    fn run_enrichment(&self, state: &mut MergeState, options: &AssembleOptions) -> Result<()> {
        if options.mode != IndexMode::Code {
            return Ok(());
        }
        let indexing = &options.config.indexing;
        let type_cross_file = indexing.type_inference_cross_file_enabled();
        let risk_cross_file = indexing.risk_cross_file_enabled();
        if !type_cross_file && !risk_cross_file {
            return Ok(());
        }

        tracing::debug!(
            "Running cross-file enrichment (type inference: {}, risk correlation: {})",
            indexing.type_inference,
            risk_cross_file
        );
        self.enricher.enrich(EnrichmentRequest {
            root: &options.root,
            chunks: &mut state.chunks,
            file_relations: &state.file_relations,
            enable_type_inference: indexing.type_inference,
            enable_risk_correlation: risk_cross_file,
        })
    }
}

/// Assemble with the default collaborators
pub fn assemble_index_pieces(options: &AssembleOptions) -> Result<AssemblyReport> {
    Assembler::new(&options.config).assemble(options)
}

/// Absolute input paths in lexicographic order
fn sorted_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut resolved = inputs
        .iter()
        .map(|dir| std::path::absolute(dir).map_err(|e| AssembleError::io(dir, e)))
        .collect::<Result<Vec<_>>>()?;
    resolved.sort();
    Ok(resolved)
}

/// The single compatibility key shared by all inputs, if any declares one
fn check_compatibility(inputs: &[PathBuf], strict: bool) -> Result<Option<String>> {
    let mut keys = Vec::new();
    for dir in inputs {
        if let Some(key) = read_compatibility_key(dir, strict)? {
            keys.push((dir.clone(), key));
        }
    }

    let distinct: BTreeSet<&str> = keys.iter().map(|(_, key)| key.as_str()).collect();
    if distinct.len() > 1 {
        return Err(AssembleError::CompatibilityKeyMismatch { keys });
    }
    Ok(keys.into_iter().next().map(|(_, key)| key))
}

/// Load every piece, results in input order
fn load_pieces(inputs: &[PathBuf], config: &AppConfig, show_progress: bool) -> Vec<Result<IndexPiece>> {
    let pb = counting_bar(inputs.len(), "Loading pieces...", show_progress);

    let load = |dir: &PathBuf| {
        let piece = IndexPiece::open(dir, config.strict);
        if let Some(pb) = &pb {
            pb.inc(1);
        }
        piece
    };

    let pieces: Vec<Result<IndexPiece>> = if config.parallel_load && inputs.len() > 1 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_load_threads())
            .build()
        {
            Ok(pool) => pool.install(|| inputs.par_iter().map(load).collect()),
            Err(e) => {
                tracing::warn!("Failed to start loader pool, loading serially: {}", e);
                inputs.iter().map(load).collect()
            }
        }
    } else {
        inputs.iter().map(load).collect()
    };

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    pieces
}

/// Per-doc tables must cover the merged chunk set exactly
fn validate_merged_lengths(state: &MergeState, out_dir: &Path) -> Result<()> {
    let expected = state.chunks.len();
    if state.embeddings_seen {
        validate_length("merged dense vectors", state.dense.len(), expected, out_dir)?;
        if !state.dense_doc.is_empty() {
            validate_length("merged dense doc vectors", state.dense_doc.len(), expected, out_dir)?;
        }
        if !state.dense_code.is_empty() {
            validate_length("merged dense code vectors", state.dense_code.len(), expected, out_dir)?;
        }
    }
    if !state.minhash.is_empty() {
        validate_length("merged minhash", state.minhash.len(), expected, out_dir)?;
    }
    Ok(())
}

/// Keep call sites whose caller and target both name a chunk UID
fn filter_call_sites(chunks: &[Chunk], call_sites: Vec<CallSite>) -> (Vec<CallSite>, usize) {
    let uids: AHashSet<&str> = chunks.iter().filter_map(Chunk::uid).collect();
    let before = call_sites.len();
    let kept: Vec<CallSite> = call_sites
        .into_iter()
        .filter(|site| {
            let resolves = |uid: &Option<String>| uid.as_deref().is_some_and(|u| uids.contains(u));
            resolves(&site.caller_chunk_uid) && resolves(&site.target_chunk_uid)
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}
