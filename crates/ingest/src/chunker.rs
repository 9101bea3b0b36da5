use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::Chunk;

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Upper bound on chunk size in bytes.
    pub max_chars: usize,
    /// Trailing text carried into the next chunk.
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 500,
            overlap_chars: 100,
        }
    }
}

/// Splits text into overlapping windows, preferring sentence boundaries.
/// Deterministic: identical input and configuration produce identical
/// chunk boundaries.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let pieces = self.split_pieces(text);
        if pieces.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut i = 0;
        while i < pieces.len() {
            // Fill the window sentence by sentence.
            let mut j = i;
            let mut len = 0;
            while j < pieces.len() {
                let piece_len = pieces[j].1.len();
                if j > i && len + piece_len > self.config.max_chars {
                    break;
                }
                len += piece_len;
                j += 1;
            }

            let start = pieces[i].0;
            let end = pieces[j - 1].0 + pieces[j - 1].1.len();
            let window = &text[start..end];
            if !window.trim().is_empty() {
                chunks.push(Chunk::new(doc_id, window, start, end));
            }

            if j >= pieces.len() {
                break;
            }

            // Back up so the next window overlaps the tail of this one.
            let mut k = j;
            let mut overlap = 0;
            while k > i + 1 {
                let piece_len = pieces[k - 1].1.len();
                if overlap + piece_len > self.config.overlap_chars {
                    break;
                }
                overlap += piece_len;
                k -= 1;
            }
            i = k;
        }

        chunks
    }

    /// Sentence pieces with their byte offsets; sentences longer than the
    /// window are hard-split at character boundaries.
    fn split_pieces<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        let mut pieces = Vec::new();
        for (offset, sentence) in text.split_sentence_bound_indices() {
            if sentence.len() <= self.config.max_chars {
                pieces.push((offset, sentence));
                continue;
            }
            let mut start = 0;
            let mut end = 0;
            for (idx, c) in sentence.char_indices() {
                if idx - start + c.len_utf8() > self.config.max_chars {
                    pieces.push((offset + start, &sentence[start..idx]));
                    start = idx;
                }
                end = idx + c.len_utf8();
            }
            if start < end {
                pieces.push((offset + start, &sentence[start..end]));
            }
        }
        pieces
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> String {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!(
                "Sentence number {i} talks about knowledge graphs and retrieval. "
            ));
        }
        text
    }

    #[test]
    fn rechunking_is_deterministic() {
        let chunker = Chunker::default();
        let text = sample_text();
        let a = chunker.chunk_text("doc", &text);
        let b = chunker.chunk_text("doc", &text);

        assert!(!a.is_empty());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert_eq!((x.start, x.end), (y.start, y.end));
        }
    }

    #[test]
    fn chunks_respect_the_size_bound() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chars: 200,
            overlap_chars: 40,
        });
        for chunk in chunker.chunk_text("doc", &sample_text()) {
            assert!(chunk.text.len() <= 200, "chunk of {} bytes", chunk.text.len());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chars: 200,
            overlap_chars: 80,
        });
        let chunks = chunker.chunk_text("doc", &sample_text());
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "windows should share a tail");
        }
    }

    #[test]
    fn offsets_slice_back_into_the_source() {
        let chunker = Chunker::default();
        let text = sample_text();
        for chunk in chunker.chunk_text("doc", &text) {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn short_text_is_one_chunk_ending_at_a_sentence() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk_text("doc", "First sentence. Second sentence.");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.ends_with("Second sentence."));
    }

    #[test]
    fn oversize_sentence_is_hard_split() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chars: 50,
            overlap_chars: 0,
        });
        let long = "x".repeat(180);
        let chunks = chunker.chunk_text("doc", &long);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 50);
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk_text("doc", "").is_empty());
        assert!(chunker.chunk_text("doc", "   \n  ").is_empty());
    }
}
