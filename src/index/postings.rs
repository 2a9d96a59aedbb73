//! Postings shapes and their merge-time operations.
//!
//! Two shapes exist: term-frequency lists of `(docId, count)` pairs for
//! token and field postings, and presence-only id lists for phrase and
//! character n-grams. Both implement [`DocPostings`] so the accumulator,
//! remap and finalizer can treat them uniformly through [`PostingsTable`].

use crate::index::ordering::DocIdMap;
use crate::index::types::DocId;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use serde_json::Value;

/// Operations every postings shape supports
pub trait DocPostings: Sized {
    /// Add `offset` to every doc id
    fn shift(&mut self, offset: DocId);

    /// Append another list for the same term
    fn append(&mut self, other: Self);

    /// Rewrite doc ids through a translation table
    fn remap(&mut self, map: &DocIdMap);

    /// Canonical sorted form
    fn normalize(&mut self);

    /// Drop entries referencing docs at or beyond `limit`; returns how many
    fn retain_below(&mut self, limit: DocId) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `(docId, count)` postings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TermFreqPostings(pub Vec<(DocId, u32)>);

/// Presence-only postings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdListPostings(pub Vec<DocId>);

impl DocPostings for TermFreqPostings {
    fn shift(&mut self, offset: DocId) {
        if offset == 0 {
            return;
        }
        for entry in &mut self.0 {
            entry.0 += offset;
        }
    }

    fn append(&mut self, mut other: Self) {
        self.0.append(&mut other.0);
    }

    fn remap(&mut self, map: &DocIdMap) {
        self.0.retain_mut(|entry| match map.get(entry.0) {
            Some(new_id) => {
                entry.0 = new_id;
                true
            }
            None => false,
        });
    }

    fn normalize(&mut self) {
        self.0.sort_unstable();
    }

    fn retain_below(&mut self, limit: DocId) -> usize {
        let before = self.0.len();
        self.0.retain(|&(doc, _)| doc < limit);
        before - self.0.len()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

impl DocPostings for IdListPostings {
    fn shift(&mut self, offset: DocId) {
        if offset == 0 {
            return;
        }
        for doc in &mut self.0 {
            *doc += offset;
        }
    }

    fn append(&mut self, mut other: Self) {
        self.0.append(&mut other.0);
    }

    fn remap(&mut self, map: &DocIdMap) {
        self.0.retain_mut(|doc| match map.get(*doc) {
            Some(new_id) => {
                *doc = new_id;
                true
            }
            None => false,
        });
    }

    fn normalize(&mut self) {
        if self.0.len() <= 1 {
            return;
        }
        // Bitmap iteration yields ascending, unique ids
        let bitmap: RoaringBitmap = self.0.iter().copied().collect();
        self.0 = bitmap.iter().collect();
    }

    fn retain_below(&mut self, limit: DocId) -> usize {
        let before = self.0.len();
        self.0.retain(|&doc| doc < limit);
        before - self.0.len()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Postings keyed by vocabulary term
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostingsTable<P> {
    terms: FxHashMap<String, P>,
}

impl<P: DocPostings> PostingsTable<P> {
    pub fn new() -> Self {
        Self {
            terms: FxHashMap::default(),
        }
    }

    /// Merge one piece's list for `term`, shifted into the global doc space.
    ///
    /// An unseen term takes the list as-is; a seen term gets it appended.
    pub fn merge(&mut self, term: String, mut postings: P, offset: DocId) {
        postings.shift(offset);
        match self.terms.get_mut(&term) {
            Some(existing) => existing.append(postings),
            None => {
                self.terms.insert(term, postings);
            }
        }
    }

    pub fn remap(&mut self, map: &DocIdMap) {
        for postings in self.terms.values_mut() {
            postings.remap(map);
        }
    }

    /// Consume into lexicographically sorted vocab and normalized postings
    pub fn finalize(self) -> (Vec<String>, Vec<P>) {
        let mut entries: Vec<(String, P)> = self.terms.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut vocab = Vec::with_capacity(entries.len());
        let mut postings = Vec::with_capacity(entries.len());
        for (term, mut list) in entries {
            list.normalize();
            vocab.push(term);
            postings.push(list);
        }
        (vocab, postings)
    }

    pub fn get(&self, term: &str) -> Option<&P> {
        self.terms.get(term)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Decode one term-frequency list, dropping entries that are not
/// `[docId, count]` with a non-negative integral doc id; counts truncate.
pub fn decode_tf_list(value: &Value) -> Vec<(DocId, u32)> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let doc = doc_id_of(pair.first()?)?;
            let count = pair.get(1)?.as_f64().filter(|c| c.is_finite())?;
            Some((doc, count.trunc().max(0.0) as u32))
        })
        .collect()
}

/// Decode one id list, dropping non-integral entries
pub fn decode_id_list(value: &Value) -> Vec<DocId> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries.iter().filter_map(doc_id_of).collect()
}

fn doc_id_of(value: &Value) -> Option<DocId> {
    if let Some(id) = value.as_u64() {
        return DocId::try_from(id).ok();
    }
    let float = value.as_f64()?;
    if float.is_finite() && float >= 0.0 && float.fract() == 0.0 && float <= DocId::MAX as f64 {
        Some(float as DocId)
    } else {
        None
    }
}
