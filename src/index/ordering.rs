//! Canonical chunk ordering and doc-id remapping.
//!
//! Canonical order sorts chunks by `(file, start, end)` with the
//! accumulation id as the final tie-break. Because pieces cover disjoint
//! files and are folded in sorted order, the resulting order does not depend
//! on how the chunk set was split into pieces.

use crate::index::merge::MergeState;
use crate::index::types::{Chunk, DocId};

/// Translation table from accumulation ids to canonical ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocIdMap {
    old_to_new: Vec<DocId>,
}

impl DocIdMap {
    /// Build from a canonical order, where `order[new_id] == old_id`
    pub fn from_order(order: &[DocId]) -> Self {
        let mut old_to_new = vec![0; order.len()];
        for (new_id, &old_id) in order.iter().enumerate() {
            old_to_new[old_id as usize] = new_id as DocId;
        }
        Self { old_to_new }
    }

    #[inline]
    pub fn get(&self, old_id: DocId) -> Option<DocId> {
        self.old_to_new.get(old_id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.old_to_new.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old_to_new.is_empty()
    }
}

/// Canonical order of `chunks`: `order[new_id] == old_id`
pub fn canonical_order(chunks: &[Chunk]) -> Vec<DocId> {
    let mut order: Vec<DocId> = (0..chunks.len() as DocId).collect();
    order.sort_by(|&a, &b| {
        chunks[a as usize]
            .cmp_canonical(&chunks[b as usize])
            .then(a.cmp(&b))
    });
    order
}

/// True when `order` is the identity permutation
pub fn is_identity(order: &[DocId]) -> bool {
    order.iter().enumerate().all(|(i, &old)| old as usize == i)
}

/// Reorder `values` so that `result[new_id] = values[order[new_id]]`
fn permute<T>(values: Vec<T>, order: &[DocId]) -> Vec<T> {
    let mut slots: Vec<Option<T>> = values.into_iter().map(Some).collect();
    order
        .iter()
        .filter_map(|&old| slots.get_mut(old as usize).and_then(Option::take))
        .collect()
}

/// Put the accumulated state into canonical order.
///
/// Returns whether any doc moved. When the canonical order already equals
/// accumulation order nothing is rewritten.
pub fn apply_canonical_order(state: &mut MergeState) -> bool {
    let order = canonical_order(&state.chunks);
    if is_identity(&order) {
        return false;
    }

    let map = DocIdMap::from_order(&order);
    let doc_count = order.len();

    let chunks = std::mem::take(&mut state.chunks);
    state.chunks = permute(chunks, &order);
    for (new_id, chunk) in state.chunks.iter_mut().enumerate() {
        chunk.id = new_id as DocId;
    }

    let doc_lengths = std::mem::take(&mut state.doc_lengths);
    state.doc_lengths = permute(doc_lengths, &order);

    for lengths in state.field_doc_lengths.values_mut() {
        // Partial per-field arrays cannot be placed per doc; leave them be
        if lengths.len() != doc_count {
            continue;
        }
        *lengths = permute(std::mem::take(lengths), &order);
    }

    if let Some(tokens) = state.field_tokens.take() {
        state.field_tokens = Some(permute(tokens, &order));
    }

    state.minhash.permute_rows(&order, doc_count);
    state.dense.permute_rows(&order, doc_count);
    state.dense_doc.permute_rows(&order, doc_count);
    state.dense_code.permute_rows(&order, doc_count);

    state.token_postings.remap(&map);
    for table in state.field_postings.values_mut() {
        table.remap(&map);
    }
    state.phrase_postings.remap(&map);
    state.chargram_postings.remap(&map);

    tracing::debug!("Remapped {} doc(s) into canonical order", doc_count);
    true
}

/// Per-doc row arrays that are only rewritten when fully populated
trait PermuteRows {
    fn permute_rows(&mut self, order: &[DocId], doc_count: usize);
}

impl<T> PermuteRows for Vec<T> {
    fn permute_rows(&mut self, order: &[DocId], doc_count: usize) {
        if self.len() != doc_count {
            return;
        }
        *self = permute(std::mem::take(self), order);
    }
}
