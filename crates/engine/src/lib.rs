pub mod config;
pub mod metrics;
pub mod ontology;
pub mod pipeline;
pub mod retry;

pub use config::{Config, ConfigError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ontology::OntologySummary;
pub use pipeline::{ChunkFailure, IngestReport, Pipeline, StageReport, StageStatus};
pub use retry::RetryPolicy;

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use extract::{Extractor, OllamaClient};
use graph::{DeleteOutcome, GraphError, GraphService, GraphStats};
use index::{
    Embedder, EmbeddingClient, EmbeddingService, PayloadKind, VectorIndex, VectorPayload,
};
use query::{CompletionModel, OllamaCompletion, Orchestrator, QueryResponse};
use resolve::{EntityResolver, ResolveReport, ResolverConfig};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub chunks: usize,
    pub entities: usize,
    pub relationships: usize,
    pub failed_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub doc_id: String,
    pub outcome: DeleteOutcome,
    pub vectors_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub graph: GraphStats,
    pub vectors: usize,
    pub documents: usize,
    /// True when the persistent backend was configured but unreachable and
    /// the in-memory fallback is serving.
    pub degraded: bool,
}

/// Owns the graph service, the vector index, and the ingestion/retrieval
/// machinery. One instance per process; everything hangs off it.
pub struct Engine {
    graph: Arc<GraphService>,
    index: Arc<VectorIndex>,
    embedder: Arc<EmbeddingService>,
    pipeline: Pipeline,
    resolver: EntityResolver,
    orchestrator: Orchestrator,
    metrics: Arc<Metrics>,
    registry: tokio::sync::RwLock<BTreeMap<String, DocumentRecord>>,
    resolve_after_ingest: bool,
}

impl Engine {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let graph = Arc::new(GraphService::connect(&config.backend_settings()).await);
        Self::with_graph(config, graph).await
    }

    /// Builds the engine over an existing graph service. The vector index is
    /// rebuilt from the store's chunk and entity sets; it is not a source of
    /// truth.
    pub async fn with_graph(config: Config, graph: Arc<GraphService>) -> Result<Self> {
        config.validate()?;

        let embedder = Arc::new(if config.embedding.enabled {
            EmbeddingService::new(
                EmbeddingClient::new(
                    config.embedding.base_url.clone(),
                    config.embedding.model.clone(),
                    config.embedding.dimension,
                    Duration::from_secs(config.embedding.timeout_secs),
                ),
                config.embedding.cache_entries,
            )
        } else {
            EmbeddingService::hash_only(config.embedding.dimension, config.embedding.cache_entries)
        });

        let extractor = Arc::new(if config.llm.enabled {
            Extractor::with_llm(
                OllamaClient::new(
                    config.llm.base_url.clone(),
                    config.llm.model.clone(),
                    Duration::from_secs(config.llm.timeout_secs),
                ),
                config.llm.max_retries,
            )
        } else {
            Extractor::rule_based()
        });

        let completion: Option<Arc<dyn CompletionModel>> = if config.llm.enabled {
            Some(Arc::new(OllamaCompletion::new(
                config.llm.base_url.clone(),
                config.llm.model.clone(),
                Duration::from_secs(config.llm.timeout_secs),
            )))
        } else {
            None
        };

        let index = Arc::new(VectorIndex::new());
        let retry = Arc::new(RetryPolicy::from_config(&config.retry));

        let pipeline = Pipeline::new(
            &config,
            Arc::clone(&graph),
            Arc::clone(&index),
            Arc::clone(&embedder),
            extractor,
            retry,
        );

        let orchestrator = Orchestrator::new(
            Arc::clone(&graph),
            Arc::clone(&index),
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            completion,
            config.retrieval_config(),
        );

        let engine = Self {
            graph,
            index,
            embedder,
            pipeline,
            resolver: EntityResolver::new(ResolverConfig {
                similarity_threshold: config.resolver.similarity_threshold,
            }),
            orchestrator,
            metrics: Metrics::new(),
            registry: tokio::sync::RwLock::new(BTreeMap::new()),
            resolve_after_ingest: config.resolver.resolve_after_ingest,
        };
        engine.rebuild_index().await?;
        Ok(engine)
    }

    async fn rebuild_index(&self) -> Result<()> {
        let mut rebuilt = 0;
        for chunk in self.graph.chunks().await? {
            let vector = self.embedder.embed(&chunk.text).await?;
            self.index.add(
                chunk.chunk_id.clone(),
                vector,
                VectorPayload {
                    kind: PayloadKind::Chunk,
                    doc_id: chunk.doc_id,
                    text: chunk.text,
                    entity_id: None,
                },
            );
            rebuilt += 1;
        }
        for entity in self.graph.all_entities().await? {
            let text = pipeline::entity_embedding_text(
                &entity.name,
                &entity.entity_type,
                &entity.properties,
            );
            let vector = self.embedder.embed(&text).await?;
            let doc_id = entity
                .provenance
                .iter()
                .next()
                .map(|p| p.doc_id.clone())
                .unwrap_or_default();
            self.index.add(
                entity.id.clone(),
                vector,
                VectorPayload {
                    kind: PayloadKind::Entity,
                    doc_id,
                    text,
                    entity_id: Some(entity.id.clone()),
                },
            );
            rebuilt += 1;
        }
        if rebuilt > 0 {
            info!(vectors = rebuilt, "vector index rebuilt from graph store");
        }
        Ok(())
    }

    /// Runs the full ingestion pipeline on one document's text.
    pub async fn ingest_document(&self, doc_id: &str, text: &str) -> Result<IngestReport> {
        let started = Instant::now();
        let mut report = match self.pipeline.ingest(doc_id, text).await {
            Ok(report) => report,
            Err(err) => {
                self.metrics.record_ingest_failure();
                return Err(err);
            }
        };

        if self.resolve_after_ingest {
            let resolve_started = Instant::now();
            match self.resolver.resolve(&self.graph).await {
                Ok(resolution) => {
                    self.metrics.record_resolve(resolution.merged_entities);
                    self.prune_merged_vectors().await;
                    report.stages.push(StageReport {
                        stage: "entity_resolution".to_string(),
                        detail: format!("{} entities merged", resolution.merged_entities),
                        status: StageStatus::Complete,
                        elapsed_ms: resolve_started.elapsed().as_millis() as u64,
                    });
                    report.resolution = Some(resolution);
                }
                Err(err) => {
                    warn!(doc_id, error = %err, "post-ingest resolution failed");
                    report.stages.push(StageReport {
                        stage: "entity_resolution".to_string(),
                        detail: format!("failed: {err:#}"),
                        status: StageStatus::Failed,
                        elapsed_ms: resolve_started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        self.registry.write().await.insert(
            doc_id.to_string(),
            DocumentRecord {
                doc_id: doc_id.to_string(),
                chunks: report.chunks_total,
                entities: report.entities_upserted,
                relationships: report.relationships_upserted,
                failed_chunks: report.chunk_failures.len(),
            },
        );
        self.metrics.record_ingest(
            started.elapsed(),
            report.chunks_total,
            report.chunk_failures.len(),
        );
        Ok(report)
    }

    /// Removes a document and everything whose provenance becomes empty
    /// without it.
    pub async fn delete_document(&self, doc_id: &str) -> Result<DeleteReport> {
        let known = self.registry.write().await.remove(doc_id).is_some();
        let outcome = self.graph.delete_by_provenance(doc_id).await?;

        if !known
            && outcome.entities_removed == 0
            && outcome.entities_retained == 0
            && outcome.relationships_removed == 0
            && outcome.chunks_removed == 0
        {
            return Err(GraphError::not_found("document", doc_id).into());
        }

        let mut vectors_removed = self
            .index
            .remove_where(|p| p.kind == PayloadKind::Chunk && p.doc_id == doc_id);
        for entity_id in &outcome.removed_entity_ids {
            if self.index.remove(entity_id) {
                vectors_removed += 1;
            }
        }

        info!(
            doc_id,
            entities_removed = outcome.entities_removed,
            entities_retained = outcome.entities_retained,
            vectors_removed,
            "document deleted"
        );
        Ok(DeleteReport {
            doc_id: doc_id.to_string(),
            outcome,
            vectors_removed,
        })
    }

    pub async fn query(&self, text: &str) -> QueryResponse {
        let started = Instant::now();
        let response = self.orchestrator.execute(text).await;
        self.metrics.record_query(
            started.elapsed(),
            response.state != query::QueryState::Failed,
        );
        response
    }

    /// On-demand entity resolution pass.
    pub async fn resolve(&self) -> Result<ResolveReport> {
        let report = self.resolver.resolve(&self.graph).await?;
        self.metrics.record_resolve(report.merged_entities);
        self.prune_merged_vectors().await;
        Ok(report)
    }

    /// Drops index entries whose entity no longer exists after a merge.
    async fn prune_merged_vectors(&self) {
        let Ok(entities) = self.graph.all_entities().await else {
            return;
        };
        let live: std::collections::BTreeSet<String> =
            entities.into_iter().map(|e| e.id).collect();
        self.index.remove_where(|p| {
            p.kind == PayloadKind::Entity
                && p.entity_id
                    .as_ref()
                    .map(|id| !live.contains(id))
                    .unwrap_or(false)
        });
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            graph: self.graph.stats().await?,
            vectors: self.index.len(),
            documents: self.registry.read().await.len(),
            degraded: self.graph.degraded(),
        })
    }

    pub async fn ontology(&self) -> Result<OntologySummary> {
        Ok(ontology::summarize(&self.graph).await?)
    }

    pub async fn list_documents(&self) -> Vec<DocumentRecord> {
        self.registry.read().await.values().cloned().collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn graph(&self) -> &GraphService {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query::QueryState;

    const APPLE_TEXT: &str =
        "Apple Inc. was founded by Steve Jobs and Steve Wozniak in Cupertino.";

    fn test_config() -> Config {
        Config::default()
    }

    async fn engine() -> Engine {
        Engine::new(test_config()).await.unwrap()
    }

    async fn founder_targets(engine: &Engine) -> Vec<String> {
        let mut names = Vec::new();
        for rel in engine.graph().all_relationships().await.unwrap() {
            if rel.rel_type == "Founder" {
                let target = engine.graph().entity(&rel.target).await.unwrap();
                names.push(target.name);
            }
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn ingest_extracts_expected_graph() {
        let engine = engine().await;
        let report = engine.ingest_document("doc-apple", APPLE_TEXT).await.unwrap();

        assert_eq!(report.chunks_total, 1);
        assert_eq!(report.chunks_succeeded, 1);
        assert!(report.chunk_failures.is_empty());
        assert!(report.used_fallback_extraction);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.graph.entities, 4);
        assert_eq!(stats.graph.entities_by_type["Company"], 1);
        assert_eq!(stats.graph.entities_by_type["Person"], 2);
        assert_eq!(stats.graph.entities_by_type["Location"], 1);

        assert_eq!(
            founder_targets(&engine).await,
            vec!["Steve Jobs".to_string(), "Steve Wozniak".to_string()]
        );
    }

    #[tokio::test]
    async fn reingesting_identical_content_is_idempotent() {
        let engine = engine().await;
        engine.ingest_document("doc-apple", APPLE_TEXT).await.unwrap();
        let before = engine.stats().await.unwrap();

        engine.ingest_document("doc-apple", APPLE_TEXT).await.unwrap();
        let after = engine.stats().await.unwrap();

        assert_eq!(before.graph.entities, after.graph.entities);
        assert_eq!(before.graph.relationships, after.graph.relationships);
        assert_eq!(before.graph.chunks, after.graph.chunks);
        assert_eq!(before.vectors, after.vectors);
    }

    #[tokio::test]
    async fn deleting_a_document_cascades_but_keeps_corroborated_entities() {
        let engine = engine().await;
        engine.ingest_document("doc-apple", APPLE_TEXT).await.unwrap();
        engine
            .ingest_document("doc-bio", "Steve Jobs started another venture later.")
            .await
            .unwrap();

        let report = engine.delete_document("doc-apple").await.unwrap();
        assert!(report.outcome.entities_removed >= 3);
        assert_eq!(report.outcome.entities_retained, 1);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.graph.entities, 1);
        assert_eq!(stats.graph.relationships, 0);
        assert_eq!(stats.documents, 1);

        let remaining = engine.graph().all_entities().await.unwrap();
        assert_eq!(remaining[0].name, "Steve Jobs");
    }

    #[tokio::test]
    async fn deleting_an_unknown_document_is_an_error() {
        let engine = engine().await;
        let err = engine.delete_document("no-such-doc").await.unwrap_err();
        assert!(err.downcast_ref::<GraphError>().is_some());
    }

    #[tokio::test]
    async fn empty_document_fails_ingestion() {
        let engine = engine().await;
        assert!(engine.ingest_document("doc-empty", "   ").await.is_err());
        assert_eq!(engine.metrics().documents_failed, 1);
    }

    #[tokio::test]
    async fn query_collects_graph_evidence_without_synthesis_backend() {
        let engine = engine().await;
        engine.ingest_document("doc-apple", APPLE_TEXT).await.unwrap();

        let response = engine.query("Who founded Apple Inc.?").await;
        // No completion backend configured: ranked evidence plus marker.
        assert_eq!(response.state, QueryState::Failed);
        assert!(response.synthesis_unavailable);
        assert!(!response.evidence.is_empty());

        let founder_evidence: Vec<_> = response
            .evidence
            .iter()
            .filter(|e| {
                e.metadata.get("depth") == Some(&serde_json::json!(1))
                    && e.metadata.get("entity_type") == Some(&serde_json::json!("Person"))
            })
            .collect();
        assert_eq!(founder_evidence.len(), 2);
        for item in founder_evidence {
            assert_eq!(item.confidence, 0.5);
        }
    }

    #[tokio::test]
    async fn vector_index_is_rebuilt_on_startup() {
        let graph = Arc::new(GraphService::in_memory());
        let first = Engine::with_graph(test_config(), Arc::clone(&graph))
            .await
            .unwrap();
        first.ingest_document("doc-apple", APPLE_TEXT).await.unwrap();
        let vectors_before = first.stats().await.unwrap().vectors;
        assert!(vectors_before > 0);
        drop(first);

        let second = Engine::with_graph(test_config(), graph).await.unwrap();
        assert_eq!(second.stats().await.unwrap().vectors, vectors_before);
    }

    #[tokio::test]
    async fn in_memory_backend_is_not_degraded() {
        let engine = engine().await;
        assert!(!engine.stats().await.unwrap().degraded);
    }

    #[tokio::test]
    async fn registry_tracks_ingested_documents() {
        let engine = engine().await;
        engine.ingest_document("doc-apple", APPLE_TEXT).await.unwrap();

        let docs = engine.list_documents().await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "doc-apple");
        assert_eq!(docs[0].chunks, 1);
        assert!(docs[0].entities >= 4);

        let snapshot = engine.metrics();
        assert_eq!(snapshot.documents_ingested, 1);
        assert_eq!(snapshot.chunks_processed, 1);
    }
}
