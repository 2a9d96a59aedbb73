//! End-to-end assembly tests over piece directories written to disk.

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use index_assembly::index::{Assembler, AssembleOptions, IndexMode, IndexPiece, Stage};
use index_assembly::utils::{AppConfig, IndexLock, NoProvenance};
use serde_json::Value;
use std::path::{Path, PathBuf};

fn options(inputs: Vec<PathBuf>, out: &Path) -> AssembleOptions {
    let mut options = AssembleOptions::new(inputs, out);
    options.generated_at = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
    options.config = AppConfig::default();
    options
}

fn assembler(options: &AssembleOptions) -> Assembler {
    Assembler::new(&options.config).with_provenance(NoProvenance)
}

fn a_js_chunks() -> Vec<ChunkFixture> {
    vec![
        ChunkFixture::new("a.js", 0, 40, "main", &["main", "load", "config"]),
        ChunkFixture::new("a.js", 41, 90, "load", &["load", "file", "read", "file"]),
        ChunkFixture::new("a.js", 91, 140, "config", &["config", "env"]),
    ]
}

fn b_js_chunks() -> Vec<ChunkFixture> {
    vec![
        ChunkFixture::new("b.js", 0, 30, "parse", &["parse", "token"]),
        ChunkFixture::new("b.js", 31, 80, "render", &["render", "token", "html"]),
    ]
}

fn c_py_chunks() -> Vec<ChunkFixture> {
    vec![ChunkFixture::new("c.py", 0, 25, "run", &["run", "config", "env"])]
}

#[test]
fn test_two_shards_merge_in_canonical_order() {
    let dir = tempfile::tempdir().unwrap();
    let shard_a = dir.path().join("shard-a");
    let shard_b = dir.path().join("shard-b");
    let out = dir.path().join("out");

    let a0 = chunk_uid("a.js", 0, 40);
    let b1 = chunk_uid("b.js", 31, 80);
    PieceBuilder::new("v1")
        .chunks(a_js_chunks())
        .call_site(&a0, &b1)
        .call_site(&a0, "nowhere")
        .imports("a.js", &["./b"])
        .write(&shard_a);
    PieceBuilder::new("v1").chunks(b_js_chunks()).write(&shard_b);

    let opts = options(vec![shard_b.clone(), shard_a.clone()], &out);
    let report = assembler(&opts).assemble(&opts).unwrap();

    assert_eq!(report.pieces, 2);
    assert_eq!(report.chunks, 5);
    assert_eq!(report.files, 2);
    assert_eq!(report.dropped_call_sites, 1);

    let chunks = read_json(&out, "chunk_meta.json");
    let order: Vec<(String, u64)> = chunks
        .as_array()
        .unwrap()
        .iter()
        .map(|c| (c["file"].as_str().unwrap().to_string(), c["start"].as_u64().unwrap()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("a.js".to_string(), 0),
            ("a.js".to_string(), 41),
            ("a.js".to_string(), 91),
            ("b.js".to_string(), 0),
            ("b.js".to_string(), 31),
        ]
    );
    for (i, chunk) in chunks.as_array().unwrap().iter().enumerate() {
        assert_eq!(chunk["id"], i);
    }

    // docLengths [3, 4, 2, 2, 3] average 2.8
    let postings = read_json(&out, "token_postings.json");
    assert_eq!(postings["docLengths"], serde_json::json!([3, 4, 2, 2, 3]));
    assert_eq!(postings["k1"], 1.7);
    assert_eq!(postings["b"], 0.8);
    assert!((postings["avgChunkLen"].as_f64().unwrap() - 2.8).abs() < 1e-9);

    let sites = read_json(&out, "call_sites.json");
    assert_eq!(sites.as_array().unwrap().len(), 1);
    assert_eq!(sites[0]["callerChunkUid"], a0.as_str());
    assert_eq!(sites[0]["targetChunkUid"], b1.as_str());

    let graphs = read_json(&out, "graph_relations.json");
    assert_eq!(graphs["callGraph"][a0.as_str()], serde_json::json!([b1]));
    assert_eq!(graphs["importGraph"]["a.js"], serde_json::json!(["./b"]));

    let state = read_json(&out, "index_state.json");
    assert_eq!(state["assembled"], true);
    assert_eq!(state["compatibilityKey"], "v1");
    assert_eq!(state["generatedAt"], "2024-01-02T03:04:05.000Z");
    assert_eq!(state["filterIndex"]["ready"], true);
}

#[test]
fn test_backfilled_file_fields_survive() {
    let dir = tempfile::tempdir().unwrap();
    let shard = dir.path().join("shard");
    let out = dir.path().join("out");
    PieceBuilder::new("v1").chunks(b_js_chunks()).write(&shard);

    let opts = options(vec![shard], &out);
    assembler(&opts).assemble(&opts).unwrap();

    let chunks = read_json(&out, "chunk_meta.json");
    assert_eq!(chunks[0]["ext"], ".js");
    assert_eq!(chunks[0]["fileHash"], "hash-b.js");
    assert_eq!(chunks[0]["churn"], 1);
    assert_eq!(chunks[0]["docmeta"]["signature"], "parse()");
}

#[test]
fn test_shard_count_invariance() {
    let dir = tempfile::tempdir().unwrap();
    let all: Vec<ChunkFixture> = a_js_chunks().into_iter().chain(b_js_chunks()).chain(c_py_chunks()).collect();

    let single = dir.path().join("single");
    PieceBuilder::new("v1").chunks(all).dense(4).minhash().write(&single);

    let split: Vec<PathBuf> = ["p0", "p1", "p2"].iter().map(|n| dir.path().join(n)).collect();
    // Piece names deliberately disagree with file order
    PieceBuilder::new("v1").chunks(c_py_chunks()).dense(4).minhash().write(&split[0]);
    PieceBuilder::new("v1").chunks(b_js_chunks()).dense(4).minhash().write(&split[1]);
    PieceBuilder::new("v1").chunks(a_js_chunks()).dense(4).minhash().write(&split[2]);

    let out_one = dir.path().join("out-one");
    let out_many = dir.path().join("out-many");
    let opts_one = options(vec![single], &out_one);
    let opts_many = options(split, &out_many);
    assembler(&opts_one).assemble(&opts_one).unwrap();
    let report = assembler(&opts_many).assemble(&opts_many).unwrap();
    assert!(report.remapped);

    assert_eq!(snapshot(&out_one), snapshot(&out_many));
}

#[test]
fn test_single_unordered_piece_matches_split() {
    let dir = tempfile::tempdir().unwrap();
    let z_js = || {
        vec![
            ChunkFixture::new("z.js", 0, 10, "zeta", &["zeta", "tail"]),
            ChunkFixture::new("z.js", 11, 20, "omega", &["omega", "tail", "end"]),
        ]
    };
    let a_js = || vec![ChunkFixture::new("a.js", 0, 10, "alpha", &["alpha", "head"])];

    let single = dir.path().join("single");
    PieceBuilder::new("v1")
        .chunks(z_js())
        .chunks(a_js())
        .dense(4)
        .minhash()
        .call_site(&chunk_uid("z.js", 0, 10), &chunk_uid("a.js", 0, 10))
        .write(&single);

    let split: Vec<PathBuf> = ["p0", "p1"].iter().map(|n| dir.path().join(n)).collect();
    PieceBuilder::new("v1").chunks(a_js()).dense(4).minhash().write(&split[0]);
    PieceBuilder::new("v1")
        .chunks(z_js())
        .dense(4)
        .minhash()
        .call_site(&chunk_uid("z.js", 0, 10), &chunk_uid("a.js", 0, 10))
        .write(&split[1]);

    let out_one = dir.path().join("out-one");
    let out_many = dir.path().join("out-many");
    let opts_one = options(vec![single], &out_one);
    let opts_many = options(split, &out_many);
    let report = assembler(&opts_one).assemble(&opts_one).unwrap();
    assert!(report.remapped);
    assert_eq!(report.pieces, 1);
    assembler(&opts_many).assemble(&opts_many).unwrap();

    assert_eq!(snapshot(&out_one), snapshot(&out_many));

    let piece = IndexPiece::open(&out_one, true).unwrap();
    let order: Vec<(&str, u64)> = piece
        .chunks
        .iter()
        .map(|c| (c.file.as_deref().unwrap(), c.start.unwrap()))
        .collect();
    assert_eq!(order, vec![("a.js", 0), ("z.js", 0), ("z.js", 11)]);
}

#[test]
fn test_assembly_is_deterministic_across_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    PieceBuilder::new("v1").chunks(a_js_chunks()).write(&a);
    PieceBuilder::new("v1").chunks(b_js_chunks()).write(&b);

    let out1 = dir.path().join("out1");
    let out2 = dir.path().join("out2");
    let opts1 = options(vec![a.clone(), b.clone()], &out1);
    let opts2 = options(vec![b, a], &out2);
    assembler(&opts1).assemble(&opts1).unwrap();
    assembler(&opts2).assemble(&opts2).unwrap();

    assert_eq!(snapshot(&out1), snapshot(&out2));
}

#[test]
fn test_remap_moves_planted_chunk_data() {
    let dir = tempfile::tempdir().unwrap();
    // "first" sorts before "second" but holds the file that sorts last
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    PieceBuilder::new("v1")
        .chunk(ChunkFixture::new("z.js", 0, 10, "planted", &["planted", "zeta"]))
        .dense(3)
        .minhash()
        .write(&first);
    PieceBuilder::new("v1").chunks(a_js_chunks()).dense(3).minhash().write(&second);

    let out = dir.path().join("out");
    let opts = options(vec![first, second], &out);
    let report = assembler(&opts).assemble(&opts).unwrap();
    assert!(report.remapped);

    let chunks = read_json(&out, "chunk_meta.json");
    let planted_id = chunks
        .as_array()
        .unwrap()
        .iter()
        .position(|c| c["file"] == "z.js")
        .unwrap();
    assert_eq!(planted_id, 3);

    let postings = read_json(&out, "token_postings.json");
    let vocab: Vec<&str> = postings["vocab"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    let term = vocab.iter().position(|t| *t == "planted").unwrap();
    assert_eq!(postings["postings"][term], serde_json::json!([[planted_id, 1]]));
    assert_eq!(postings["docLengths"][planted_id], 2);

    let dense = read_json(&out, "dense_vectors_uint8.json");
    assert_eq!(dense["vectors"][planted_id], serde_json::json!([0, 0, 0]));
    assert_eq!(dense["vectors"][0], serde_json::json!([0, 0, 0]));
    assert_eq!(dense["vectors"][1], serde_json::json!([41, 41, 41]));

    let minhash = read_json(&out, "minhash_signatures.json");
    assert_eq!(minhash["signatures"][planted_id], serde_json::json!([0, 10, 4]));

    let fields = read_json(&out, "field_postings.json");
    let name = &fields["fields"]["name"];
    let name_vocab: Vec<&str> = name["vocab"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    let planted_term = name_vocab.iter().position(|t| *t == "planted").unwrap();
    assert_eq!(name["postings"][planted_term], serde_json::json!([[planted_id, 1]]));
}

#[test]
fn test_compatibility_mismatch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    PieceBuilder::new("v1").chunks(a_js_chunks()).write(&a);
    PieceBuilder::new("v2").chunks(b_js_chunks()).write(&b);

    let out = dir.path().join("out");
    let opts = options(vec![a, b], &out);
    let err = assembler(&opts).assemble(&opts).unwrap_err();

    assert_eq!(err.code(), "COMPATIBILITY_KEY_MISMATCH");
    let msg = err.to_string();
    assert!(msg.contains("v1") && msg.contains("v2"));
    assert!(!out.exists());
    assert!(IndexLock::acquire(&out).is_ok());
}

#[test]
fn test_missing_compatibility_key_strict_and_forced() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    PieceBuilder::new("v1").without_key().chunks(a_js_chunks()).write(&a);

    let out = dir.path().join("out");
    let mut opts = options(vec![a], &out);
    let err = assembler(&opts).assemble(&opts).unwrap_err();
    assert_eq!(err.code(), "COMPATIBILITY_KEY_MISSING");

    opts.config.strict = false;
    assembler(&opts).assemble(&opts).unwrap();
    assert_eq!(read_json(&out, "index_state.json")["compatibilityKey"], Value::Null);
}

#[test]
fn test_dense_dims_mismatch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    PieceBuilder::new("v1").chunks(a_js_chunks()).dense(256).write(&a);
    PieceBuilder::new("v1").chunks(b_js_chunks()).dense(128).write(&b);

    let out = dir.path().join("out");
    let opts = options(vec![a, b], &out);
    let err = assembler(&opts).assemble(&opts).unwrap_err();

    assert_eq!(err.code(), "EMBEDDING_MISMATCH");
    let msg = err.to_string();
    assert!(msg.contains("256") && msg.contains("128"));
    assert!(!out.exists());
}

#[test]
fn test_doc_lengths_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    PieceBuilder::new("v1").chunks(a_js_chunks()).write(&a);
    let mut postings = read_json(&a, "token_postings.json");
    postings["docLengths"] = serde_json::json!([1, 2]);
    write_json(&a, "token_postings.json", &postings);

    let out = dir.path().join("out");
    let opts = options(vec![a], &out);
    let err = assembler(&opts).assemble(&opts).unwrap_err();

    assert_eq!(err.code(), "LENGTH_MISMATCH");
    assert!(err.to_string().contains("docLengths length mismatch (2 !== 3)"));
    assert!(!out.exists());
}

#[test]
fn test_partial_embeddings_fail_merged_validation() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    PieceBuilder::new("v1").chunks(a_js_chunks()).dense(4).write(&a);
    PieceBuilder::new("v1").chunks(b_js_chunks()).write(&b);

    let out = dir.path().join("out");
    let opts = options(vec![a, b], &out);
    let err = assembler(&opts).assemble(&opts).unwrap_err();
    assert!(err.to_string().contains("merged dense vectors length mismatch (3 !== 5)"));
}

#[test]
fn test_reassembly_is_fixed_point() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    PieceBuilder::new("v1").chunks(b_js_chunks()).dense(2).minhash().write(&a);
    PieceBuilder::new("v1")
        .chunks(a_js_chunks())
        .dense(2)
        .minhash()
        .call_site(&chunk_uid("a.js", 0, 40), &chunk_uid("b.js", 0, 30))
        .write(&b);

    let first = dir.path().join("first");
    let second = dir.path().join("second");
    let opts1 = options(vec![a, b], &first);
    assembler(&opts1).assemble(&opts1).unwrap();
    let opts2 = options(vec![first.clone()], &second);
    let report = assembler(&opts2).assemble(&opts2).unwrap();

    assert!(!report.remapped);
    assert_eq!(snapshot(&first), snapshot(&second));
}

#[test]
fn test_held_lock_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    PieceBuilder::new("v1").chunks(a_js_chunks()).write(&a);

    let out = dir.path().join("out");
    let _held = IndexLock::acquire(&out).unwrap();
    let opts = options(vec![a], &out);
    let err = assembler(&opts).assemble(&opts).unwrap_err();

    assert_eq!(err.code(), "LOCK_HELD");
    assert!(!out.exists());
}

#[test]
fn test_empty_pieces_report_no_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    PieceBuilder::new("v1").write(&a);

    let opts = options(vec![a], &dir.path().join("out"));
    let err = assembler(&opts).assemble(&opts).unwrap_err();
    assert_eq!(err.code(), "NO_CHUNKS");
}

#[test]
fn test_missing_input_dir() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(vec![dir.path().join("absent")], &dir.path().join("out"));
    let err = assembler(&opts).assemble(&opts).unwrap_err();
    assert_eq!(err.code(), "MISSING_INPUT_DIR");
}

#[test]
fn test_stage_selection_and_prose_mode() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    PieceBuilder::new("v1").stage("sparse").chunks(a_js_chunks()).write(&a);
    PieceBuilder::new("v1").stage("embeddings").chunks(b_js_chunks()).write(&b);

    let out = dir.path().join("out");
    let mut opts = options(vec![a.clone(), b.clone()], &out);
    opts.mode = IndexMode::Prose;
    assembler(&opts).assemble(&opts).unwrap();

    let state = read_json(&out, "index_state.json");
    assert_eq!(state["stage"], "stage3");
    assert_eq!(state["mode"], "prose");
    assert!(!out.join("graph_relations.json").exists());

    let mut opts = options(vec![a, b], &out);
    opts.stage = Some(Stage::Stage4);
    assembler(&opts).assemble(&opts).unwrap();
    assert_eq!(read_json(&out, "index_state.json")["stage"], "stage4");
}

#[test]
fn test_assembled_output_loads_as_piece() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    PieceBuilder::new("v1").chunks(a_js_chunks()).write(&a);

    let out = dir.path().join("out");
    let opts = options(vec![a], &out);
    assembler(&opts).assemble(&opts).unwrap();

    let piece = IndexPiece::open(&out, true).unwrap();
    assert_eq!(piece.chunk_count(), 3);
    assert_eq!(piece.compatibility_key.as_deref(), Some("v1"));
    assert!(piece.field_postings.unwrap().contains_key("name"));
}
