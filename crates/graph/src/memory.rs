use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::model::{
    DeleteOutcome, Entity, EntityId, GraphStats, MergeOutcome, NewEntity, NewRelationship,
    Relationship, StoredChunk, TraversalHit, natural_key, normalize_name,
};
use crate::store::{GraphError, GraphStore};

/// Process-local backend. Single source of truth for the shared store
/// semantics; the persistent backend mirrors this behavior.
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    entities: BTreeMap<EntityId, Entity>,
    key_to_id: HashMap<String, EntityId>,
    relationships: BTreeMap<String, Relationship>,
    rel_key_to_id: HashMap<String, String>,
    chunks: BTreeMap<String, StoredChunk>,
    entity_seq: u64,
    rel_seq: u64,
}

fn rel_key(source: &str, rel_type: &str, target: &str) -> String {
    format!("{}|{}|{}", source, rel_type.trim().to_lowercase(), target)
}

fn merge_properties(
    props: &mut BTreeMap<String, serde_json::Value>,
    alternates: &mut BTreeMap<String, Vec<serde_json::Value>>,
    incoming: BTreeMap<String, serde_json::Value>,
) {
    for (key, value) in incoming {
        match props.get(&key) {
            None => {
                props.insert(key, value);
            }
            Some(existing) if *existing != value => {
                let alts = alternates.entry(key).or_default();
                if !alts.contains(&value) {
                    alts.push(value);
                }
            }
            Some(_) => {}
        }
    }
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_entity(&self, entity: NewEntity) -> Result<EntityId, GraphError> {
        let name = entity.name.trim().to_string();
        if name.is_empty() {
            return Err(GraphError::InvalidEntity(
                "canonical name must be non-empty".into(),
            ));
        }

        let key = natural_key(&name, &entity.entity_type);
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.key_to_id.get(&key).cloned() {
            let existing = inner
                .entities
                .get_mut(&id)
                .ok_or_else(|| GraphError::not_found("entity", &id))?;
            merge_properties(
                &mut existing.properties,
                &mut existing.alternate_values,
                entity.properties,
            );
            existing.provenance.extend(entity.provenance);
            return Ok(id);
        }

        inner.entity_seq += 1;
        let id = format!("ent_{:08}", inner.entity_seq);
        let record = Entity {
            id: id.clone(),
            name,
            entity_type: entity.entity_type.trim().to_string(),
            properties: entity.properties,
            alternate_values: BTreeMap::new(),
            provenance: entity.provenance,
            created_seq: inner.entity_seq,
        };
        inner.entities.insert(id.clone(), record);
        inner.key_to_id.insert(key, id.clone());
        Ok(id)
    }

    async fn upsert_relationship(&self, rel: NewRelationship) -> Result<String, GraphError> {
        let mut inner = self.inner.write().await;
        if !inner.entities.contains_key(&rel.source) {
            return Err(GraphError::not_found("entity", &rel.source));
        }
        if !inner.entities.contains_key(&rel.target) {
            return Err(GraphError::not_found("entity", &rel.target));
        }

        let key = rel_key(&rel.source, &rel.rel_type, &rel.target);
        if let Some(id) = inner.rel_key_to_id.get(&key).cloned() {
            let existing = inner
                .relationships
                .get_mut(&id)
                .ok_or_else(|| GraphError::not_found("relationship", &id))?;
            existing.provenance.extend(rel.provenance);
            let incoming = rel.properties;
            let mut alternates = BTreeMap::new();
            merge_properties(&mut existing.properties, &mut alternates, incoming);
            return Ok(id);
        }

        inner.rel_seq += 1;
        let id = format!("rel_{:08}", inner.rel_seq);
        inner.relationships.insert(
            id.clone(),
            Relationship {
                id: id.clone(),
                source: rel.source,
                target: rel.target,
                rel_type: rel.rel_type.trim().to_string(),
                properties: rel.properties,
                provenance: rel.provenance,
            },
        );
        inner.rel_key_to_id.insert(key, id.clone());
        Ok(id)
    }

    async fn entity(&self, id: &str) -> Result<Entity, GraphError> {
        let inner = self.inner.read().await;
        inner
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::not_found("entity", id))
    }

    async fn entities_by_type(&self, entity_type: &str) -> Result<Vec<Entity>, GraphError> {
        let inner = self.inner.read().await;
        let mut out: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| e.entity_type.eq_ignore_ascii_case(entity_type))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_seq);
        Ok(out)
    }

    async fn find_by_name(
        &self,
        name: &str,
        entity_type: Option<&str>,
    ) -> Result<Vec<Entity>, GraphError> {
        let needle = normalize_name(name);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        let mut out: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| normalize_name(&e.name).contains(&needle))
            .filter(|e| {
                entity_type
                    .map(|t| e.entity_type.eq_ignore_ascii_case(t))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_seq);
        Ok(out)
    }

    async fn neighbors(
        &self,
        id: &str,
        max_depth: usize,
        rel_filter: Option<&str>,
    ) -> Result<Vec<TraversalHit>, GraphError> {
        let inner = self.inner.read().await;
        let start = inner
            .entities
            .get(id)
            .ok_or_else(|| GraphError::not_found("entity", id))?;

        let mut hits = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, usize, Vec<String>, Vec<String>)> = VecDeque::new();
        queue.push_back((id.to_string(), 0, vec![start.name.clone()], Vec::new()));
        visited.insert(id.to_string());

        while let Some((node_id, depth, path_names, path_rels)) = queue.pop_front() {
            if let Some(entity) = inner.entities.get(&node_id) {
                hits.push(TraversalHit {
                    entity: entity.clone(),
                    depth,
                    path_names: path_names.clone(),
                    path_rels: path_rels.clone(),
                });
            }
            if depth == max_depth {
                continue;
            }
            // BTreeMap order keeps expansion deterministic.
            for rel in inner.relationships.values() {
                if let Some(filter) = rel_filter {
                    if !rel.rel_type.eq_ignore_ascii_case(filter) {
                        continue;
                    }
                }
                let next = if rel.source == node_id {
                    Some(&rel.target)
                } else if rel.target == node_id {
                    Some(&rel.source)
                } else {
                    None
                };
                let Some(next_id) = next else { continue };
                if visited.contains(next_id) {
                    continue;
                }
                let Some(next_entity) = inner.entities.get(next_id) else {
                    continue;
                };
                visited.insert(next_id.clone());
                let mut names = path_names.clone();
                names.push(next_entity.name.clone());
                let mut rels = path_rels.clone();
                rels.push(rel.rel_type.clone());
                queue.push_back((next_id.clone(), depth + 1, names, rels));
            }
        }

        Ok(hits)
    }

    async fn delete_by_provenance(&self, doc_id: &str) -> Result<DeleteOutcome, GraphError> {
        let mut inner = self.inner.write().await;
        let mut outcome = DeleteOutcome::default();

        let mut removed_entities: BTreeSet<String> = BTreeSet::new();
        for entity in inner.entities.values_mut() {
            let before = entity.provenance.len();
            entity.provenance.retain(|p| p.doc_id != doc_id);
            if entity.provenance.len() < before {
                if entity.provenance.is_empty() {
                    removed_entities.insert(entity.id.clone());
                } else {
                    outcome.entities_retained += 1;
                }
            }
        }
        for id in &removed_entities {
            if let Some(entity) = inner.entities.remove(id) {
                inner
                    .key_to_id
                    .remove(&natural_key(&entity.name, &entity.entity_type));
                outcome.entities_removed += 1;
                outcome.removed_entity_ids.push(id.clone());
            }
        }

        let mut removed_rels: Vec<String> = Vec::new();
        for rel in inner.relationships.values_mut() {
            rel.provenance.retain(|p| p.doc_id != doc_id);
            if rel.provenance.is_empty()
                || removed_entities.contains(&rel.source)
                || removed_entities.contains(&rel.target)
            {
                removed_rels.push(rel.id.clone());
            }
        }
        for id in removed_rels {
            if let Some(rel) = inner.relationships.remove(&id) {
                inner
                    .rel_key_to_id
                    .remove(&rel_key(&rel.source, &rel.rel_type, &rel.target));
                outcome.relationships_removed += 1;
            }
        }

        let chunk_ids: Vec<String> = inner
            .chunks
            .values()
            .filter(|c| c.doc_id == doc_id)
            .map(|c| c.chunk_id.clone())
            .collect();
        for id in chunk_ids {
            inner.chunks.remove(&id);
            outcome.chunks_removed += 1;
        }

        Ok(outcome)
    }

    async fn stats(&self) -> Result<GraphStats, GraphError> {
        let inner = self.inner.read().await;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        for entity in inner.entities.values() {
            *by_type.entry(entity.entity_type.clone()).or_default() += 1;
        }
        Ok(GraphStats {
            entities: inner.entities.len(),
            relationships: inner.relationships.len(),
            chunks: inner.chunks.len(),
            entities_by_type: by_type,
        })
    }

    async fn upsert_chunk(&self, chunk: StoredChunk) -> Result<(), GraphError> {
        let mut inner = self.inner.write().await;
        inner.chunks.insert(chunk.chunk_id.clone(), chunk);
        Ok(())
    }

    async fn chunks(&self) -> Result<Vec<StoredChunk>, GraphError> {
        let inner = self.inner.read().await;
        Ok(inner.chunks.values().cloned().collect())
    }

    async fn all_entities(&self) -> Result<Vec<Entity>, GraphError> {
        let inner = self.inner.read().await;
        Ok(inner.entities.values().cloned().collect())
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>, GraphError> {
        let inner = self.inner.read().await;
        Ok(inner.relationships.values().cloned().collect())
    }

    async fn merge_entities(&self, keep: &str, remove: &str) -> Result<MergeOutcome, GraphError> {
        if keep == remove {
            return Ok(MergeOutcome::default());
        }
        let mut inner = self.inner.write().await;
        if !inner.entities.contains_key(keep) {
            return Err(GraphError::not_found("entity", keep));
        }
        let removed = inner
            .entities
            .remove(remove)
            .ok_or_else(|| GraphError::not_found("entity", remove))?;

        {
            let canonical = inner.entities.get_mut(keep).expect("checked above");
            merge_properties(
                &mut canonical.properties,
                &mut canonical.alternate_values,
                removed.properties.clone(),
            );
            canonical.provenance.extend(removed.provenance.iter().cloned());
        }

        // Future upserts of the removed spelling resolve to the canonical id.
        inner.key_to_id.insert(
            natural_key(&removed.name, &removed.entity_type),
            keep.to_string(),
        );

        let mut outcome = MergeOutcome::default();
        let affected: Vec<String> = inner
            .relationships
            .values()
            .filter(|r| r.source == remove || r.target == remove)
            .map(|r| r.id.clone())
            .collect();

        for rel_id in affected {
            let Some(mut rel) = inner.relationships.remove(&rel_id) else {
                continue;
            };
            inner
                .rel_key_to_id
                .remove(&rel_key(&rel.source, &rel.rel_type, &rel.target));

            if rel.source == remove {
                rel.source = keep.to_string();
            }
            if rel.target == remove {
                rel.target = keep.to_string();
            }
            if rel.source == rel.target {
                // Edge between the merged pair collapses to nothing.
                outcome.deduplicated_relationships += 1;
                continue;
            }

            let key = rel_key(&rel.source, &rel.rel_type, &rel.target);
            if let Some(existing_id) = inner.rel_key_to_id.get(&key).cloned() {
                if let Some(existing) = inner.relationships.get_mut(&existing_id) {
                    existing.provenance.extend(rel.provenance);
                    outcome.deduplicated_relationships += 1;
                    continue;
                }
            }
            inner.rel_key_to_id.insert(key, rel.id.clone());
            inner.relationships.insert(rel.id.clone(), rel);
            outcome.redirected_relationships += 1;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provenance;

    fn prov(doc: &str, chunk: &str) -> Provenance {
        Provenance::new(doc, chunk)
    }

    #[tokio::test]
    async fn upsert_by_natural_key_merges() {
        let store = MemoryGraphStore::new();
        let a = store
            .upsert_entity(NewEntity::new("Apple Inc.", "Company").with_provenance(prov("d1", "c1")))
            .await
            .unwrap();
        let b = store
            .upsert_entity(NewEntity::new("apple inc", "Company").with_provenance(prov("d2", "c9")))
            .await
            .unwrap();
        assert_eq!(a, b);

        let entity = store.entity(&a).await.unwrap();
        assert_eq!(entity.provenance.len(), 2);
        assert_eq!(store.stats().await.unwrap().entities, 1);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let store = MemoryGraphStore::new();
        let err = store
            .upsert_entity(NewEntity::new("   ", "Company"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidEntity(_)));
    }

    #[tokio::test]
    async fn relationship_requires_existing_endpoints() {
        let store = MemoryGraphStore::new();
        let a = store
            .upsert_entity(NewEntity::new("Apple Inc.", "Company"))
            .await
            .unwrap();
        let err = store
            .upsert_relationship(NewRelationship::new(a.clone(), "Founder", "ent_nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound { .. }));
    }

    #[tokio::test]
    async fn duplicate_edges_collapse_with_merged_provenance() {
        let store = MemoryGraphStore::new();
        let a = store
            .upsert_entity(NewEntity::new("Apple Inc.", "Company"))
            .await
            .unwrap();
        let b = store
            .upsert_entity(NewEntity::new("Steve Jobs", "Person"))
            .await
            .unwrap();

        let r1 = store
            .upsert_relationship(
                NewRelationship::new(a.clone(), "Founder", b.clone())
                    .with_provenance(prov("d1", "c1")),
            )
            .await
            .unwrap();
        let r2 = store
            .upsert_relationship(
                NewRelationship::new(a.clone(), "Founder", b.clone())
                    .with_provenance(prov("d2", "c2")),
            )
            .await
            .unwrap();
        assert_eq!(r1, r2);

        // A different type between the same pair is a distinct edge.
        let r3 = store
            .upsert_relationship(NewRelationship::new(a.clone(), "EmployedBy", b.clone()))
            .await
            .unwrap();
        assert_ne!(r1, r3);

        let rels = store.all_relationships().await.unwrap();
        assert_eq!(rels.len(), 2);
        let founder = rels.iter().find(|r| r.rel_type == "Founder").unwrap();
        assert_eq!(founder.provenance.len(), 2);
    }

    #[tokio::test]
    async fn neighbors_reports_minimum_depth_paths() {
        let store = MemoryGraphStore::new();
        let apple = store
            .upsert_entity(NewEntity::new("Apple Inc.", "Company"))
            .await
            .unwrap();
        let jobs = store
            .upsert_entity(NewEntity::new("Steve Jobs", "Person"))
            .await
            .unwrap();
        let next = store
            .upsert_entity(NewEntity::new("NeXT", "Company"))
            .await
            .unwrap();
        store
            .upsert_relationship(NewRelationship::new(apple.clone(), "Founder", jobs.clone()))
            .await
            .unwrap();
        store
            .upsert_relationship(NewRelationship::new(next.clone(), "Founder", jobs.clone()))
            .await
            .unwrap();

        let hits = store.neighbors(&apple, 2, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].depth, 0);
        let jobs_hit = hits.iter().find(|h| h.entity.id == jobs).unwrap();
        assert_eq!(jobs_hit.depth, 1);
        let next_hit = hits.iter().find(|h| h.entity.id == next).unwrap();
        assert_eq!(next_hit.depth, 2);
        assert_eq!(
            next_hit.describe(),
            "Apple Inc. -[Founder]- Steve Jobs -[Founder]- NeXT"
        );

        let bounded = store.neighbors(&apple, 1, None).await.unwrap();
        assert_eq!(bounded.len(), 2);
    }

    #[tokio::test]
    async fn delete_by_provenance_cascades_and_retains_corroborated() {
        let store = MemoryGraphStore::new();
        let apple = store
            .upsert_entity(NewEntity::new("Apple Inc.", "Company").with_provenance(prov("d1", "c1")))
            .await
            .unwrap();
        // Corroborated by a second document.
        store
            .upsert_entity(NewEntity::new("Apple Inc.", "Company").with_provenance(prov("d2", "c7")))
            .await
            .unwrap();
        let jobs = store
            .upsert_entity(NewEntity::new("Steve Jobs", "Person").with_provenance(prov("d1", "c1")))
            .await
            .unwrap();
        store
            .upsert_relationship(
                NewRelationship::new(apple.clone(), "Founder", jobs.clone())
                    .with_provenance(prov("d1", "c1")),
            )
            .await
            .unwrap();
        store
            .upsert_chunk(StoredChunk {
                chunk_id: "c1".into(),
                doc_id: "d1".into(),
                text: "...".into(),
                start: 0,
                end: 3,
            })
            .await
            .unwrap();

        let outcome = store.delete_by_provenance("d1").await.unwrap();
        assert_eq!(outcome.entities_removed, 1); // Steve Jobs
        assert_eq!(outcome.entities_retained, 1); // Apple Inc.
        assert_eq!(outcome.relationships_removed, 1);
        assert_eq!(outcome.chunks_removed, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.relationships, 0);
        assert!(store.entity(&apple).await.is_ok());
    }

    #[tokio::test]
    async fn merge_redirects_and_deduplicates_edges() {
        let store = MemoryGraphStore::new();
        let apple = store
            .upsert_entity(NewEntity::new("Apple Inc.", "Company"))
            .await
            .unwrap();
        let jobs = store
            .upsert_entity(NewEntity::new("Steve Jobs", "Person").with_provenance(prov("d1", "c1")))
            .await
            .unwrap();
        let s_jobs = store
            .upsert_entity(NewEntity::new("S. Jobs", "Person").with_provenance(prov("d2", "c2")))
            .await
            .unwrap();
        store
            .upsert_relationship(NewRelationship::new(apple.clone(), "Founder", jobs.clone()))
            .await
            .unwrap();
        store
            .upsert_relationship(NewRelationship::new(apple.clone(), "Founder", s_jobs.clone()))
            .await
            .unwrap();

        let outcome = store.merge_entities(&jobs, &s_jobs).await.unwrap();
        assert_eq!(outcome.deduplicated_relationships, 1);

        let merged = store.entity(&jobs).await.unwrap();
        assert_eq!(merged.provenance.len(), 2);
        assert!(store.entity(&s_jobs).await.is_err());
        assert_eq!(store.stats().await.unwrap().relationships, 1);

        // The removed spelling now resolves to the canonical record.
        let again = store
            .upsert_entity(NewEntity::new("S. Jobs", "Person"))
            .await
            .unwrap();
        assert_eq!(again, jobs);
    }
}
