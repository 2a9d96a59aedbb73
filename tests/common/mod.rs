//! Piece directory builder shared by the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One chunk to place in a piece
#[derive(Debug, Clone)]
pub struct ChunkFixture {
    pub file: String,
    pub start: u64,
    pub end: u64,
    pub name: String,
    pub tokens: Vec<String>,
}

impl ChunkFixture {
    pub fn new(file: &str, start: u64, end: u64, name: &str, tokens: &[&str]) -> Self {
        Self {
            file: file.to_string(),
            start,
            end,
            name: name.to_string(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn uid(&self) -> String {
        chunk_uid(&self.file, self.start, self.end)
    }
}

pub fn chunk_uid(file: &str, start: u64, end: u64) -> String {
    format!("{file}:{start}-{end}")
}

/// Writes an index piece in the on-disk layout the loader expects
#[derive(Debug, Clone)]
pub struct PieceBuilder {
    key: Option<String>,
    stage: Option<String>,
    chunks: Vec<ChunkFixture>,
    dense_dims: Option<u32>,
    minhash: bool,
    call_sites: Vec<(String, String)>,
    imports: Vec<(String, Vec<String>)>,
}

impl PieceBuilder {
    pub fn new(key: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            stage: Some("stage2".to_string()),
            chunks: Vec::new(),
            dense_dims: None,
            minhash: false,
            call_sites: Vec::new(),
            imports: Vec::new(),
        }
    }

    pub fn without_key(mut self) -> Self {
        self.key = None;
        self
    }

    pub fn stage(mut self, stage: &str) -> Self {
        self.stage = Some(stage.to_string());
        self
    }

    pub fn chunk(mut self, fixture: ChunkFixture) -> Self {
        self.chunks.push(fixture);
        self
    }

    pub fn chunks(mut self, fixtures: impl IntoIterator<Item = ChunkFixture>) -> Self {
        self.chunks.extend(fixtures);
        self
    }

    pub fn dense(mut self, dims: u32) -> Self {
        self.dense_dims = Some(dims);
        self
    }

    pub fn minhash(mut self) -> Self {
        self.minhash = true;
        self
    }

    pub fn call_site(mut self, caller: &str, target: &str) -> Self {
        self.call_sites.push((caller.to_string(), target.to_string()));
        self
    }

    pub fn imports(mut self, file: &str, imports: &[&str]) -> Self {
        self.imports
            .push((file.to_string(), imports.iter().map(|s| s.to_string()).collect()));
        self
    }

    pub fn write(&self, dir: &Path) {
        fs::create_dir_all(dir.join("pieces")).unwrap();

        let mut manifest = json!({ "pieces": ["chunk_meta.json", "token_postings.json"] });
        if let Some(key) = &self.key {
            manifest["fields"] = json!({ "compatibilityKey": key });
        }
        write_json(dir, "pieces/manifest.json", &manifest);

        let mut state = json!({ "mode": "code" });
        if let Some(stage) = &self.stage {
            state["stage"] = json!(stage);
        }
        write_json(dir, "index_state.json", &state);

        // Piece-local file ids in first-seen order
        let mut file_ids: BTreeMap<&str, usize> = BTreeMap::new();
        for fixture in &self.chunks {
            let next = file_ids.len();
            file_ids.entry(fixture.file.as_str()).or_insert(next);
        }
        let mut file_rows: Vec<(usize, &str)> = file_ids.iter().map(|(f, id)| (*id, *f)).collect();
        file_rows.sort();
        let file_meta: Vec<Value> = file_rows
            .iter()
            .map(|(id, file)| {
                json!({
                    "id": id,
                    "file": file,
                    "ext": ext_of(file),
                    "size": file.len() * 100,
                    "hash": format!("hash-{file}"),
                    "churn": 1
                })
            })
            .collect();
        write_json(dir, "file_meta.json", &json!(file_meta));

        // Chunks rely on file_meta for their file and ext
        let chunk_meta: Vec<Value> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, fixture)| {
                json!({
                    "id": i,
                    "fileId": file_ids[fixture.file.as_str()],
                    "start": fixture.start,
                    "end": fixture.end,
                    "name": fixture.name,
                    "kind": "function",
                    "chunkUid": fixture.uid(),
                    "docmeta": { "signature": format!("{}()", fixture.name) }
                })
            })
            .collect();
        write_json(dir, "chunk_meta.json", &json!(chunk_meta));

        let mut tokens: BTreeMap<&str, BTreeMap<usize, u32>> = BTreeMap::new();
        let mut grams: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut names: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (doc, fixture) in self.chunks.iter().enumerate() {
            for token in &fixture.tokens {
                *tokens.entry(token.as_str()).or_default().entry(doc).or_default() += 1;
                let gram: String = token.chars().take(2).collect();
                grams.entry(gram).or_default().push(doc);
            }
            names.entry(fixture.name.as_str()).or_default().push(doc);
        }

        let vocab: Vec<&str> = tokens.keys().copied().collect();
        let postings: Vec<Vec<(usize, u32)>> = tokens.values().map(|m| m.iter().map(|(d, c)| (*d, *c)).collect()).collect();
        let doc_lengths: Vec<usize> = self.chunks.iter().map(|c| c.tokens.len()).collect();
        write_json(
            dir,
            "token_postings.json",
            &json!({ "vocab": vocab, "postings": postings, "docLengths": doc_lengths }),
        );

        let name_vocab: Vec<&str> = names.keys().copied().collect();
        let name_postings: Vec<Vec<(usize, u32)>> =
            names.values().map(|docs| docs.iter().map(|d| (*d, 1)).collect()).collect();
        write_json(
            dir,
            "field_postings.json",
            &json!({ "fields": { "name": {
                "vocab": name_vocab,
                "postings": name_postings,
                "docLengths": vec![1; self.chunks.len()]
            }}}),
        );

        let gram_vocab: Vec<&String> = grams.keys().collect();
        let gram_postings: Vec<&Vec<usize>> = grams.values().collect();
        write_json(
            dir,
            "chargram_postings.json",
            &json!({ "vocab": gram_vocab, "postings": gram_postings }),
        );

        if self.minhash {
            let signatures: Vec<Vec<u64>> = self.chunks.iter().map(|c| vec![c.start, c.end, c.file.len() as u64]).collect();
            write_json(dir, "minhash_signatures.json", &json!({ "signatures": signatures }));
        }

        if let Some(dims) = self.dense_dims {
            let vectors: Vec<Vec<u8>> = self
                .chunks
                .iter()
                .map(|c| vec![(c.start % 251) as u8; dims as usize])
                .collect();
            write_json(
                dir,
                "dense_vectors_uint8.json",
                &json!({ "fields": { "dims": dims, "model": "stub-model", "scale": 1.0 }, "arrays": { "vectors": vectors } }),
            );
        }

        let call_sites: Vec<Value> = self
            .call_sites
            .iter()
            .enumerate()
            .map(|(i, (caller, target))| {
                json!({
                    "callSiteId": format!("site-{i}-{caller}"),
                    "callerChunkUid": caller,
                    "targetChunkUid": target
                })
            })
            .collect();
        write_json(dir, "call_sites.json", &json!(call_sites));

        let relations: Vec<Value> = self
            .imports
            .iter()
            .map(|(file, imports)| json!({ "file": file, "relations": { "imports": imports } }))
            .collect();
        write_json(dir, "file_relations.json", &json!(relations));
    }
}

fn ext_of(file: &str) -> String {
    match file.rfind('.') {
        Some(idx) => file[idx..].to_string(),
        None => String::new(),
    }
}

pub fn write_json(dir: &Path, name: &str, value: &Value) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
}

pub fn read_json(dir: &Path, name: &str) -> Value {
    serde_json::from_slice(&fs::read(dir.join(name)).unwrap()).unwrap()
}

/// Every file under `dir`, keyed by relative path
pub fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    collect(dir, dir, &mut files);
    files
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            files.insert(rel, fs::read(&path).unwrap());
        }
    }
}
