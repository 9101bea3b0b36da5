pub mod memory;
pub mod model;
pub mod neo4j;
pub mod service;
pub mod store;

pub use memory::MemoryGraphStore;
pub use model::{
    DeleteOutcome, Entity, EntityId, GraphStats, MergeOutcome, NewEntity, NewRelationship,
    Provenance, Relationship, StoredChunk, TraversalHit, natural_key, normalize_name,
};
pub use neo4j::Neo4jStore;
pub use service::{BackendKind, BackendSettings, GraphService};
pub use store::{GraphError, GraphStore};
