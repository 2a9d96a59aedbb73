//! Relation graphs over the assembled chunk set.
//!
//! Graphs are keyed by chunk UID (or `file#name` for chunks without one) and
//! every adjacency list is sorted and deduplicated so the output does not
//! depend on piece boundaries.

use crate::index::types::{CallSite, Chunk};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Adjacency lists keyed by node
pub type Graph = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationGraphs {
    pub call_graph: Graph,
    pub usage_graph: Graph,
    pub import_graph: Graph,
}

impl RelationGraphs {
    pub fn is_empty(&self) -> bool {
        self.call_graph.is_empty() && self.usage_graph.is_empty() && self.import_graph.is_empty()
    }
}

/// Builds relation graphs for code indexes
pub trait RelationGraphBuilder: Send + Sync {
    fn build(&self, chunks: &[Chunk], call_sites: &[CallSite], file_relations: &BTreeMap<String, Value>)
        -> RelationGraphs;
}

/// Default builder over call sites and per-chunk `codeRelations`
#[derive(Debug, Clone, Copy, Default)]
pub struct CallSiteGraphBuilder;

/// Node name of a chunk
fn node_id(chunk: &Chunk) -> Option<String> {
    if let Some(uid) = chunk.uid() {
        return Some(uid.to_string());
    }
    match (chunk.file.as_deref(), chunk.name.as_deref()) {
        (Some(file), Some(name)) => Some(format!("{file}#{name}")),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> impl Iterator<Item = &str> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn into_graph(edges: BTreeMap<String, BTreeSet<String>>) -> Graph {
    edges
        .into_iter()
        .filter(|(_, targets)| !targets.is_empty())
        .map(|(node, targets)| (node, targets.into_iter().collect()))
        .collect()
}

impl RelationGraphBuilder for CallSiteGraphBuilder {
    fn build(
        &self,
        chunks: &[Chunk],
        call_sites: &[CallSite],
        file_relations: &BTreeMap<String, Value>,
    ) -> RelationGraphs {
        // (file, symbol name) -> node
        let mut by_name: FxHashMap<(&str, &str), String> = FxHashMap::default();
        for chunk in chunks {
            let (Some(file), Some(name)) = (chunk.file.as_deref(), chunk.name.as_deref()) else {
                continue;
            };
            if let Some(node) = node_id(chunk) {
                // First chunk declaring a name in a file owns it
                by_name.entry((file, name)).or_insert(node);
            }
        }

        let mut calls: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut usages: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for site in call_sites {
            if let (Some(caller), Some(target)) = (&site.caller_chunk_uid, &site.target_chunk_uid) {
                calls.entry(caller.clone()).or_default().insert(target.clone());
            }
        }

        for chunk in chunks {
            let Some(node) = node_id(chunk) else { continue };
            let Some(relations) = chunk.extra.get("codeRelations") else {
                continue;
            };
            let file = chunk.file.as_deref().unwrap_or("");

            let pairs = relations.get("calls").and_then(Value::as_array).into_iter().flatten();
            for pair in pairs {
                let Some(callee) = pair.get(1).and_then(Value::as_str) else {
                    continue;
                };
                if let Some(target) = by_name.get(&(file, callee)) {
                    if *target != node {
                        calls.entry(node.clone()).or_default().insert(target.clone());
                    }
                }
            }

            for usage in string_list(relations.get("usages")) {
                usages.entry(node.clone()).or_default().insert(usage.to_string());
            }
        }

        let mut imports: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (file, relations) in file_relations {
            for import in string_list(relations.get("imports")) {
                imports.entry(file.clone()).or_default().insert(import.to_string());
            }
        }

        RelationGraphs {
            call_graph: into_graph(calls),
            usage_graph: into_graph(usages),
            import_graph: into_graph(imports),
        }
    }
}
