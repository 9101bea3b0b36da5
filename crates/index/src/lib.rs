pub mod cache;
pub mod embedder;
pub mod vector;

pub use cache::EmbeddingCache;
pub use embedder::{Embedder, EmbeddingClient, EmbeddingService, HashEmbedder};
pub use vector::{PayloadKind, SearchHit, VectorIndex, VectorPayload, cosine_similarity};
