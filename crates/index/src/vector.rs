use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// What a stored vector points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Chunk,
    Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub kind: PayloadKind,
    pub doc_id: String,
    pub text: String,
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: VectorPayload,
}

struct Entry {
    vector: Vec<f32>,
    payload: VectorPayload,
    seq: u64,
}

/// In-process (vector, payload) container with cosine nearest-neighbor
/// lookup. Not the source of truth: rebuilt from the graph store's chunk
/// set at startup.
pub struct VectorIndex {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    seq: u64,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn add(&self, id: impl Into<String>, vector: Vec<f32>, payload: VectorPayload) {
        let mut inner = self.inner.write().expect("vector index poisoned");
        inner.seq += 1;
        let seq = inner.seq;
        inner.entries.insert(
            id.into(),
            Entry {
                vector,
                payload,
                seq,
            },
        );
    }

    /// Top-k by cosine similarity, descending. Ties break by insertion
    /// order, earliest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let inner = self.inner.read().expect("vector index poisoned");
        let mut scored: Vec<(f32, u64, SearchHit)> = inner
            .entries
            .iter()
            .map(|(id, entry)| {
                let score = cosine_similarity(query, &entry.vector);
                (
                    score,
                    entry.seq,
                    SearchHit {
                        id: id.clone(),
                        score,
                        payload: entry.payload.clone(),
                    },
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.into_iter().take(k).map(|(_, _, hit)| hit).collect()
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write().expect("vector index poisoned");
        inner.entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("vector index poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("vector index poisoned");
        inner.entries.clear();
    }

    /// Drops every entry whose payload matches the predicate.
    pub fn remove_where(&self, predicate: impl Fn(&VectorPayload) -> bool) -> usize {
        let mut inner = self.inner.write().expect("vector index poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !predicate(&e.payload));
        before - inner.entries.len()
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> VectorPayload {
        VectorPayload {
            kind: PayloadKind::Chunk,
            doc_id: "d1".into(),
            text: text.into(),
            entity_id: None,
        }
    }

    #[test]
    fn search_returns_at_most_k_sorted_descending() {
        let index = VectorIndex::new();
        index.add("a", vec![1.0, 0.0], payload("a"));
        index.add("b", vec![0.0, 1.0], payload("b"));
        index.add("c", vec![0.7, 0.7], payload("c"));

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "c");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn search_never_returns_unknown_ids() {
        let index = VectorIndex::new();
        index.add("a", vec![1.0, 0.0], payload("a"));
        index.add("b", vec![0.5, 0.5], payload("b"));
        index.remove("b");

        let hits = index.search(&[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let index = VectorIndex::new();
        // Same direction, identical similarity to any query.
        index.add("second", vec![2.0, 0.0], payload("x"));
        index.add("first", vec![1.0, 0.0], payload("y"));

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].id, "second");
        assert_eq!(hits[1].id, "first");
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn remove_where_drops_matching_entries() {
        let index = VectorIndex::new();
        index.add("a", vec![1.0], payload("a"));
        let mut other = payload("b");
        other.doc_id = "d2".into();
        index.add("b", vec![1.0], other);

        assert_eq!(index.remove_where(|p| p.doc_id == "d1"), 1);
        assert_eq!(index.len(), 1);
    }
}
