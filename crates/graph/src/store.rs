use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    DeleteOutcome, Entity, EntityId, GraphStats, MergeOutcome, NewEntity, NewRelationship,
    Relationship, StoredChunk, TraversalHit,
};

#[derive(Debug, Error)]
pub enum GraphError {
    /// Retryable backend I/O failure.
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid entity: {0}")]
    InvalidEntity(String),
}

impl GraphError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<neo4rs::Error> for GraphError {
    fn from(err: neo4rs::Error) -> Self {
        GraphError::Transient(err.to_string())
    }
}

/// One contract, several backends. Selection happens at configuration time;
/// callers never inspect which implementation they hold.
///
/// All backends share upsert-by-natural-key semantics: an entity with the
/// same normalized name and type merges into the existing record instead of
/// duplicating it, and a relationship with the same (source, type, target)
/// collapses into the existing edge with merged provenance.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_entity(&self, entity: NewEntity) -> Result<EntityId, GraphError>;

    /// Both endpoints must already exist.
    async fn upsert_relationship(&self, rel: NewRelationship) -> Result<String, GraphError>;

    async fn entity(&self, id: &str) -> Result<Entity, GraphError>;

    async fn entities_by_type(&self, entity_type: &str) -> Result<Vec<Entity>, GraphError>;

    /// Case-insensitive substring match on entity names, optionally
    /// restricted to a type.
    async fn find_by_name(
        &self,
        name: &str,
        entity_type: Option<&str>,
    ) -> Result<Vec<Entity>, GraphError>;

    /// Bounded undirected breadth-first traversal. Returns one hit per
    /// reachable entity at its minimum depth, start node included at depth 0.
    async fn neighbors(
        &self,
        id: &str,
        max_depth: usize,
        rel_filter: Option<&str>,
    ) -> Result<Vec<TraversalHit>, GraphError>;

    /// Removes a document's contribution from every provenance set and
    /// deletes whatever ends up with no remaining provenance. Entities
    /// corroborated by other documents survive.
    async fn delete_by_provenance(&self, doc_id: &str) -> Result<DeleteOutcome, GraphError>;

    async fn stats(&self) -> Result<GraphStats, GraphError>;

    async fn upsert_chunk(&self, chunk: StoredChunk) -> Result<(), GraphError>;

    async fn chunks(&self) -> Result<Vec<StoredChunk>, GraphError>;

    async fn all_entities(&self) -> Result<Vec<Entity>, GraphError>;

    async fn all_relationships(&self) -> Result<Vec<Relationship>, GraphError>;

    /// Merges `remove` into `keep`: unions provenance, merges properties
    /// (keep wins, losing values recorded as alternates), redirects every
    /// relationship referencing `remove` and deduplicates the resulting
    /// parallel edges. Atomic with respect to other store operations.
    async fn merge_entities(&self, keep: &str, remove: &str) -> Result<MergeOutcome, GraphError>;
}
