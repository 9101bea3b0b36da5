pub mod chunk;
pub mod chunker;

pub use chunk::{Chunk, generate_doc_id};
pub use chunker::{Chunker, ChunkerConfig};
