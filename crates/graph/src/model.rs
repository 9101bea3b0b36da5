use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub type EntityId = String;

/// Source attribution for an entity, relationship, or chunk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub doc_id: String,
    pub chunk_id: String,
}

impl Provenance {
    pub fn new(doc_id: impl Into<String>, chunk_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            chunk_id: chunk_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: String,
    pub properties: BTreeMap<String, Value>,
    /// Property values that lost a collision during a merge, keyed by property name.
    pub alternate_values: BTreeMap<String, Vec<Value>>,
    pub provenance: BTreeSet<Provenance>,
    pub created_seq: u64,
}

/// Input for an entity upsert. The store assigns the id and creation sequence.
#[derive(Debug, Clone, Default)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: String,
    pub properties: BTreeMap<String, Value>,
    pub provenance: BTreeSet<Provenance>,
}

impl NewEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn with_provenance(mut self, prov: Provenance) -> Self {
        self.provenance.insert(prov);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source: EntityId,
    pub target: EntityId,
    pub rel_type: String,
    pub properties: BTreeMap<String, Value>,
    pub provenance: BTreeSet<Provenance>,
}

#[derive(Debug, Clone, Default)]
pub struct NewRelationship {
    pub source: EntityId,
    pub target: EntityId,
    pub rel_type: String,
    pub properties: BTreeMap<String, Value>,
    pub provenance: BTreeSet<Provenance>,
}

impl NewRelationship {
    pub fn new(
        source: impl Into<String>,
        rel_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rel_type: rel_type.into(),
            ..Default::default()
        }
    }

    pub fn with_provenance(mut self, prov: Provenance) -> Self {
        self.provenance.insert(prov);
        self
    }
}

/// Chunk text kept in the store so the vector index can be rebuilt at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// One node reached by a bounded traversal, with the path that led to it.
#[derive(Debug, Clone)]
pub struct TraversalHit {
    pub entity: Entity,
    pub depth: usize,
    /// Entity names from the start node to this node, inclusive.
    pub path_names: Vec<String>,
    /// Relationship types along the path, one per hop.
    pub path_rels: Vec<String>,
}

impl TraversalHit {
    /// Renders the path as `A -[R]- B -[S]- C`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, name) in self.path_names.iter().enumerate() {
            if i > 0 {
                let rel = self.path_rels.get(i - 1).map(String::as_str).unwrap_or("?");
                out.push_str(&format!(" -[{}]- ", rel));
            }
            out.push_str(name);
        }
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relationships: usize,
    pub chunks: usize,
    pub entities_by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub entities_removed: usize,
    pub entities_retained: usize,
    pub relationships_removed: usize,
    pub chunks_removed: usize,
    /// Ids of entities deleted by the cascade, for index cleanup.
    pub removed_entity_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub redirected_relationships: usize,
    pub deduplicated_relationships: usize,
}

/// Natural key for upsert-by-natural-key semantics: normalized name + type.
/// Same key means same real-world entity as far as the store is concerned.
pub fn natural_key(name: &str, entity_type: &str) -> String {
    format!("{}|{}", normalize_name(name), entity_type.trim().to_lowercase())
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_space = true;
    for c in name.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if c.is_whitespace() || c == '-' || c == '_' {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        }
        // remaining punctuation is dropped
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}
