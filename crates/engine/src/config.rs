use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use graph::{BackendKind, BackendSettings};

/// Fatal at startup: the engine refuses to run on invalid settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub resolver: ResolverSettings,
    pub retrieval: RetrievalSettings,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// When false, extraction uses the rule-based fallback and synthesis is
    /// reported unavailable.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// When false, the deterministic hash embedder serves directly.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub cache_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub max_chunks_per_doc: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    pub similarity_threshold: f64,
    pub resolve_after_ingest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub enable_vector: bool,
    pub enable_graph: bool,
    pub enable_filter: bool,
    pub vector_k: usize,
    pub graph_depth: usize,
    pub max_evidence: usize,
    pub confidence_top_n: usize,
    pub strategy_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Chunk workers per document.
    pub max_concurrent_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                kind: BackendKind::Memory,
                neo4j_uri: "bolt://localhost:7687".to_string(),
                neo4j_user: "neo4j".to_string(),
                neo4j_password: String::new(),
            },
            llm: LlmConfig {
                enabled: false,
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                timeout_secs: 60,
                max_retries: 3,
            },
            embedding: EmbeddingConfig {
                enabled: false,
                base_url: "http://localhost:11434".to_string(),
                model: "nomic-embed-text".to_string(),
                dimension: 384,
                timeout_secs: 30,
                cache_entries: 10_000,
            },
            chunking: ChunkingConfig {
                max_chars: 500,
                overlap_chars: 100,
                max_chunks_per_doc: 200,
            },
            resolver: ResolverSettings {
                similarity_threshold: 0.85,
                resolve_after_ingest: true,
            },
            retrieval: RetrievalSettings {
                enable_vector: true,
                enable_graph: true,
                enable_filter: true,
                vector_k: 10,
                graph_depth: 2,
                max_evidence: 10,
                confidence_top_n: 3,
                strategy_timeout_secs: 10,
                query_timeout_secs: 30,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_chunks: 4,
            },
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 500,
                max_backoff_ms: 5_000,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.chunking.max_chars == 0 {
            return invalid("chunking.max_chars must be positive".into());
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            return invalid(format!(
                "chunking.overlap_chars ({}) must be smaller than max_chars ({})",
                self.chunking.overlap_chars, self.chunking.max_chars
            ));
        }
        if self.chunking.max_chunks_per_doc == 0 {
            return invalid("chunking.max_chunks_per_doc must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.resolver.similarity_threshold) {
            return invalid(format!(
                "resolver.similarity_threshold must be in [0, 1], got {}",
                self.resolver.similarity_threshold
            ));
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be positive".into());
        }
        if self.retrieval.vector_k == 0 {
            return invalid("retrieval.vector_k must be positive".into());
        }
        if self.retrieval.graph_depth == 0 {
            return invalid("retrieval.graph_depth must be at least 1".into());
        }
        if self.retrieval.max_evidence == 0 {
            return invalid("retrieval.max_evidence must be positive".into());
        }
        if self.retrieval.confidence_top_n == 0 {
            return invalid("retrieval.confidence_top_n must be positive".into());
        }
        if self.retrieval.strategy_timeout_secs == 0 || self.retrieval.query_timeout_secs == 0 {
            return invalid("retrieval timeouts must be positive".into());
        }
        if self.concurrency.max_concurrent_chunks == 0 {
            return invalid("concurrency.max_concurrent_chunks must be positive".into());
        }
        Ok(())
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            kind: self.backend.kind,
            neo4j_uri: self.backend.neo4j_uri.clone(),
            neo4j_user: self.backend.neo4j_user.clone(),
            neo4j_password: self.backend.neo4j_password.clone(),
        }
    }

    pub fn retrieval_config(&self) -> query::RetrievalConfig {
        query::RetrievalConfig {
            toggles: query::StrategyToggles {
                vector: self.retrieval.enable_vector,
                graph: self.retrieval.enable_graph,
                filter: self.retrieval.enable_filter,
            },
            vector_k: self.retrieval.vector_k,
            graph_depth: self.retrieval.graph_depth,
            max_evidence: self.retrieval.max_evidence,
            confidence_top_n: self.retrieval.confidence_top_n,
            strategy_timeout: Duration::from_secs(self.retrieval.strategy_timeout_secs),
            query_timeout: Duration::from_secs(self.retrieval.query_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_threshold_is_fatal() {
        let mut config = Config::default();
        config.resolver.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let mut config = Config::default();
        config.chunking.overlap_chars = config.chunking.max_chars;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_depth_is_rejected() {
        let mut config = Config::default();
        config.retrieval.graph_depth = 0;
        assert!(config.validate().is_err());
    }
}
