use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An ordered span of source-document text. Immutable once created; the
/// unit of vector-similarity retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    /// Byte offsets into the source text.
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn new(doc_id: &str, text: &str, start: usize, end: usize) -> Self {
        let chunk_id = Self::generate_chunk_id(doc_id, text, start, end);
        Self {
            doc_id: doc_id.to_string(),
            chunk_id,
            text: text.to_string(),
            start,
            end,
        }
    }

    fn generate_chunk_id(doc_id: &str, text: &str, start: usize, end: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(start.to_string().as_bytes());
        hasher.update(end.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

/// Generate a stable document ID from an external label (filename, URL, ...).
pub fn generate_doc_id(label: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable_for_identical_content() {
        let a = Chunk::new("doc", "Some text.", 0, 10);
        let b = Chunk::new("doc", "Some text.", 0, 10);
        assert_eq!(a.chunk_id, b.chunk_id);

        let c = Chunk::new("doc", "Some text.", 5, 15);
        assert_ne!(a.chunk_id, c.chunk_id);
        let d = Chunk::new("other", "Some text.", 0, 10);
        assert_ne!(a.chunk_id, d.chunk_id);
    }

    #[test]
    fn doc_id_is_stable() {
        assert_eq!(generate_doc_id("report.txt"), generate_doc_id("report.txt"));
        assert_ne!(generate_doc_id("report.txt"), generate_doc_id("other.txt"));
    }
}
