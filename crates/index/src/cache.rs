use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Text-hash keyed embedding cache.
pub struct EmbeddingCache {
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            embeddings: DashMap::new(),
            max_entries,
        }
    }

    pub fn set(&self, text: &str, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full.
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take(self.max_entries / 4 + 1)
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        self.embeddings.insert(hash_text(text), embedding);
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.embeddings.get(&hash_text(text)).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn clear(&self) {
        self.embeddings.clear();
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = EmbeddingCache::new(10);
        cache.set("hello", vec![0.1, 0.2]);
        assert_eq!(cache.get("hello"), Some(vec![0.1, 0.2]));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn eviction_keeps_cache_bounded() {
        let cache = EmbeddingCache::new(8);
        for i in 0..50 {
            cache.set(&format!("text-{i}"), vec![i as f32]);
        }
        assert!(cache.len() <= 8);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = EmbeddingCache::new(0);
        cache.set("hello", vec![1.0]);
        assert!(cache.is_empty());
    }
}
