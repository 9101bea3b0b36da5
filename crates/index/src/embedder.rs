use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::warn;

use crate::cache::EmbeddingCache;

/// Abstract embedding capability. Determinism is assumed: the same text must
/// produce the same vector, or the index cannot be rebuilt faithfully.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String, dimension: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            model,
            dimension,
            client,
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding request failed: {}", response.status());
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        Ok(embedding_response.embedding)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // One bounded retry before the failure surfaces.
        match self.request(text).await {
            Ok(v) => Ok(v),
            Err(first) => {
                warn!(error = %first, "embedding request failed, retrying once");
                self.request(text).await
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic stand-in embedder: a fixed-length unit vector derived from
/// repeated hashing of the text. Used as the fallback when the embedding
/// backend is unreachable, and directly in tests.
#[derive(Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn raw_vector(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        let mut block: u64 = 0;
        while out.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if out.len() == self.dimension {
                    break;
                }
                out.push(byte as f32 / 127.5 - 1.0);
            }
            block += 1;
        }
        out
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = self.raw_vector(text);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedding front door: cache, then the configured backend, then the
/// deterministic fallback so ingestion never stalls on embeddings alone.
pub struct EmbeddingService {
    primary: Option<EmbeddingClient>,
    fallback: HashEmbedder,
    cache: EmbeddingCache,
}

impl EmbeddingService {
    pub fn new(primary: EmbeddingClient, cache_entries: usize) -> Self {
        let dimension = primary.dimension();
        Self {
            primary: Some(primary),
            fallback: HashEmbedder::new(dimension),
            cache: EmbeddingCache::new(cache_entries),
        }
    }

    /// No network backend; hash embeddings only.
    pub fn hash_only(dimension: usize, cache_entries: usize) -> Self {
        Self {
            primary: None,
            fallback: HashEmbedder::new(dimension),
            cache: EmbeddingCache::new(cache_entries),
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached);
        }
        let vector = match &self.primary {
            Some(client) => match client.embed(text).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "embedding backend unavailable, using hash fallback");
                    self.fallback.embed(text).await?
                }
            },
            None => self.fallback.embed(text).await?,
        };
        self.cache.set(text, vector.clone());
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.fallback.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_fixed_length() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Steve Jobs").await.unwrap();
        let b = embedder.embed("Steve Jobs").await.unwrap();
        let c = embedder.embed("Steve Wozniak").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn hash_embedder_produces_unit_vectors() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed("anything").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn service_caches_results() {
        let service = EmbeddingService::hash_only(16, 100);
        let a = service.embed("cached text").await.unwrap();
        let b = service.embed("cached text").await.unwrap();
        assert_eq!(a, b);
    }
}
