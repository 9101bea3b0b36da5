use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use extract::Extractor;
use graph::{GraphService, NewEntity, NewRelationship, Provenance, StoredChunk, natural_key};
use index::{Embedder, EmbeddingService, PayloadKind, VectorIndex, VectorPayload};
use ingest::{Chunk, Chunker, ChunkerConfig};

use crate::config::Config;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub detail: String,
    pub status: StageStatus,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunk_failures: Vec<ChunkFailure>,
    pub entities_upserted: usize,
    pub relationships_upserted: usize,
    /// True when at least one chunk fell back to rule-based extraction.
    pub used_fallback_extraction: bool,
    pub resolution: Option<resolve::ResolveReport>,
    pub stages: Vec<StageReport>,
}

struct ChunkOutcome {
    entities: usize,
    relationships: usize,
    used_fallback: bool,
}

/// Chunk -> extract -> embed -> graph. Chunks run concurrently up to the
/// configured worker limit; a chunk-level failure is recorded and skipped,
/// never fatal to the document.
pub struct Pipeline {
    graph: Arc<GraphService>,
    index: Arc<VectorIndex>,
    embedder: Arc<EmbeddingService>,
    extractor: Arc<Extractor>,
    retry: Arc<RetryPolicy>,
    /// Serializes graph writes that collide on the same natural key.
    key_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    chunker: Chunker,
    max_chunks_per_doc: usize,
    max_concurrent_chunks: usize,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        graph: Arc<GraphService>,
        index: Arc<VectorIndex>,
        embedder: Arc<EmbeddingService>,
        extractor: Arc<Extractor>,
        retry: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            graph,
            index,
            embedder,
            extractor,
            retry,
            key_locks: Arc::new(DashMap::new()),
            chunker: Chunker::new(ChunkerConfig {
                max_chars: config.chunking.max_chars,
                overlap_chars: config.chunking.overlap_chars,
            }),
            max_chunks_per_doc: config.chunking.max_chunks_per_doc,
            max_concurrent_chunks: config.concurrency.max_concurrent_chunks,
        }
    }

    pub async fn ingest(&self, doc_id: &str, text: &str) -> Result<IngestReport> {
        if text.trim().is_empty() {
            bail!("document {doc_id} contains no text");
        }

        let mut stages = Vec::new();

        let chunk_started = Instant::now();
        let mut chunks = self.chunker.chunk_text(doc_id, text);
        if chunks.len() > self.max_chunks_per_doc {
            warn!(
                doc_id,
                dropped = chunks.len() - self.max_chunks_per_doc,
                limit = self.max_chunks_per_doc,
                "document exceeds chunk limit, trailing chunks dropped"
            );
            chunks.truncate(self.max_chunks_per_doc);
        }
        if chunks.is_empty() {
            bail!("document {doc_id} produced no chunks");
        }
        stages.push(StageReport {
            stage: "chunking".to_string(),
            detail: format!("{} chunks", chunks.len()),
            status: StageStatus::Complete,
            elapsed_ms: chunk_started.elapsed().as_millis() as u64,
        });

        let process_started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_chunks));
        let mut set: JoinSet<(String, Result<ChunkOutcome>)> = JoinSet::new();

        for chunk in chunks.clone() {
            let worker = self.worker();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let outcome = worker.process(&chunk).await;
                (chunk.chunk_id, outcome)
            });
        }

        let mut outcomes: BTreeMap<String, Result<ChunkOutcome>> = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((chunk_id, outcome)) => {
                    outcomes.insert(chunk_id, outcome);
                }
                Err(err) => warn!(doc_id, error = %err, "chunk task aborted"),
            }
        }

        let mut report = IngestReport {
            doc_id: doc_id.to_string(),
            chunks_total: chunks.len(),
            chunks_succeeded: 0,
            chunk_failures: Vec::new(),
            entities_upserted: 0,
            relationships_upserted: 0,
            used_fallback_extraction: false,
            resolution: None,
            stages: Vec::new(),
        };

        // Report in document order, not completion order.
        for chunk in &chunks {
            match outcomes.remove(&chunk.chunk_id) {
                Some(Ok(outcome)) => {
                    report.chunks_succeeded += 1;
                    report.entities_upserted += outcome.entities;
                    report.relationships_upserted += outcome.relationships;
                    report.used_fallback_extraction |= outcome.used_fallback;
                }
                Some(Err(err)) => {
                    report.chunk_failures.push(ChunkFailure {
                        chunk_id: chunk.chunk_id.clone(),
                        error: format!("{err:#}"),
                    });
                }
                None => {
                    report.chunk_failures.push(ChunkFailure {
                        chunk_id: chunk.chunk_id.clone(),
                        error: "chunk task aborted".to_string(),
                    });
                }
            }
        }

        stages.push(StageReport {
            stage: "extraction_and_graph".to_string(),
            detail: format!(
                "{} entities, {} relationships, {} failed chunks",
                report.entities_upserted,
                report.relationships_upserted,
                report.chunk_failures.len()
            ),
            status: if report.chunks_succeeded > 0 {
                StageStatus::Complete
            } else {
                StageStatus::Failed
            },
            elapsed_ms: process_started.elapsed().as_millis() as u64,
        });
        report.stages = stages;

        if report.chunks_succeeded == 0 {
            bail!(
                "document {doc_id} failed: all {} chunks errored",
                report.chunks_total
            );
        }

        info!(
            doc_id,
            chunks = report.chunks_total,
            failed = report.chunk_failures.len(),
            entities = report.entities_upserted,
            relationships = report.relationships_upserted,
            "document ingested"
        );
        Ok(report)
    }

    fn worker(&self) -> ChunkWorker {
        ChunkWorker {
            graph: Arc::clone(&self.graph),
            index: Arc::clone(&self.index),
            embedder: Arc::clone(&self.embedder),
            extractor: Arc::clone(&self.extractor),
            retry: Arc::clone(&self.retry),
            key_locks: Arc::clone(&self.key_locks),
        }
    }
}

#[derive(Clone)]
struct ChunkWorker {
    graph: Arc<GraphService>,
    index: Arc<VectorIndex>,
    embedder: Arc<EmbeddingService>,
    extractor: Arc<Extractor>,
    retry: Arc<RetryPolicy>,
    key_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ChunkWorker {
    async fn process(&self, chunk: &Chunk) -> Result<ChunkOutcome> {
        let stored = StoredChunk {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            text: chunk.text.clone(),
            start: chunk.start,
            end: chunk.end,
        };
        self.retry
            .run("upsert_chunk", || {
                let stored = stored.clone();
                async move { self.graph.upsert_chunk(stored).await }
            })
            .await
            .context("storing chunk")?;

        let chunk_vector = self
            .embedder
            .embed(&chunk.text)
            .await
            .context("embedding chunk")?;
        self.index.add(
            chunk.chunk_id.clone(),
            chunk_vector,
            VectorPayload {
                kind: PayloadKind::Chunk,
                doc_id: chunk.doc_id.clone(),
                text: chunk.text.clone(),
                entity_id: None,
            },
        );

        let extraction = self.extractor.extract(&chunk.text).await;
        let ontology = extraction.ontology;
        let provenance = Provenance::new(chunk.doc_id.clone(), chunk.chunk_id.clone());

        let mut entity_ids: BTreeMap<String, String> = BTreeMap::new();
        for entity in &ontology.entities {
            let key = natural_key(&entity.name, &entity.entity_type);
            let lock = self
                .key_locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _guard = lock.lock().await;

            let record = NewEntity {
                name: entity.name.clone(),
                entity_type: entity.entity_type.clone(),
                properties: entity.properties.clone(),
                provenance: [provenance.clone()].into(),
            };
            let id = self
                .retry
                .run("upsert_entity", || {
                    let record = record.clone();
                    async move { self.graph.upsert_entity(record).await }
                })
                .await
                .with_context(|| format!("upserting entity {}", entity.name))?;

            let embed_text =
                entity_embedding_text(&entity.name, &entity.entity_type, &entity.properties);
            let vector = self
                .embedder
                .embed(&embed_text)
                .await
                .context("embedding entity")?;
            self.index.add(
                id.clone(),
                vector,
                VectorPayload {
                    kind: PayloadKind::Entity,
                    doc_id: chunk.doc_id.clone(),
                    text: embed_text,
                    entity_id: Some(id.clone()),
                },
            );

            entity_ids.insert(entity.name.to_lowercase(), id);
        }

        let mut relationships = 0;
        for rel in &ontology.relationships {
            let source = entity_ids.get(&rel.source_name.to_lowercase());
            let target = entity_ids.get(&rel.target_name.to_lowercase());
            let (Some(source), Some(target)) = (source, target) else {
                debug!(
                    source = %rel.source_name,
                    target = %rel.target_name,
                    "skipping relationship with unresolved endpoint"
                );
                continue;
            };

            let record = NewRelationship {
                source: source.clone(),
                target: target.clone(),
                rel_type: rel.rel_type.clone(),
                properties: BTreeMap::new(),
                provenance: [provenance.clone()].into(),
            };
            self.retry
                .run("upsert_relationship", || {
                    let record = record.clone();
                    async move { self.graph.upsert_relationship(record).await }
                })
                .await
                .with_context(|| {
                    format!("upserting relationship {} -> {}", rel.source_name, rel.target_name)
                })?;
            relationships += 1;
        }

        Ok(ChunkOutcome {
            entities: ontology.entities.len(),
            relationships,
            used_fallback: extraction.used_fallback,
        })
    }
}

/// The entity vector is derived from name, type, and properties. Shared
/// with the startup index rebuild so both produce identical vectors.
pub(crate) fn entity_embedding_text(
    name: &str,
    entity_type: &str,
    properties: &BTreeMap<String, serde_json::Value>,
) -> String {
    let mut text = format!("{} ({})", name, entity_type);
    for (key, value) in properties {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!(" {key}={rendered}"));
    }
    text
}
