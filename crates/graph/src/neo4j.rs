use async_trait::async_trait;
use neo4rs::{Graph, Query};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::{
    DeleteOutcome, Entity, EntityId, GraphStats, MergeOutcome, NewEntity, NewRelationship,
    Provenance, Relationship, StoredChunk, TraversalHit, natural_key,
};
use crate::store::{GraphError, GraphStore};

/// Persistent backend over Bolt. Nested values (property map, alternates,
/// provenance) are stored as JSON strings on the node since the property
/// graph only holds flat scalars.
///
/// Semantics mirror `MemoryGraphStore`; the entity id is the natural key,
/// and keys absorbed by a merge are kept in an `alias_keys` array so later
/// upserts of the removed spelling still resolve to the canonical node.
pub struct Neo4jStore {
    graph: Graph,
    seq: AtomicU64,
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn provenance_from_json(raw: &str) -> BTreeSet<Provenance> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn properties_from_json(raw: &str) -> BTreeMap<String, serde_json::Value> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn alternates_from_json(raw: &str) -> BTreeMap<String, Vec<serde_json::Value>> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn split_joined(joined: &str) -> Vec<String> {
    joined
        .split('\t')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
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

impl Neo4jStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, GraphError> {
        let graph = Graph::new(uri, user, password).await?;
        let store = Self {
            graph,
            seq: AtomicU64::new(0),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), GraphError> {
        let queries = [
            "CREATE INDEX entity_id_index IF NOT EXISTS FOR (e:Entity) ON (e.id)",
            "CREATE INDEX entity_name_index IF NOT EXISTS FOR (e:Entity) ON (e.name)",
            "CREATE INDEX chunk_id_index IF NOT EXISTS FOR (c:Chunk) ON (c.chunk_id)",
        ];
        for q in queries {
            self.graph.run(Query::new(q.to_string())).await?;
        }

        // Seed the creation sequence from whatever is already stored.
        let mut result = self
            .graph
            .execute(Query::new(
                "MATCH (e:Entity) RETURN coalesce(max(e.created_seq), 0) as max_seq".to_string(),
            ))
            .await?;
        if let Some(row) = result.next().await? {
            let max_seq: i64 = row.get("max_seq").unwrap_or(0);
            self.seq.store(max_seq as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    fn entity_from_row(row: &neo4rs::Row) -> Result<Entity, GraphError> {
        let id: String = row
            .get("id")
            .map_err(|e| GraphError::Transient(e.to_string()))?;
        let name: String = row
            .get("name")
            .map_err(|e| GraphError::Transient(e.to_string()))?;
        let entity_type: String = row.get("entity_type").unwrap_or_default();
        let properties: String = row.get("properties").unwrap_or_else(|_| "{}".to_string());
        let alternates: String = row.get("alternates").unwrap_or_else(|_| "{}".to_string());
        let provenance: String = row.get("provenance").unwrap_or_else(|_| "[]".to_string());
        let created_seq: i64 = row.get("created_seq").unwrap_or(0);
        Ok(Entity {
            id,
            name,
            entity_type,
            properties: properties_from_json(&properties),
            alternate_values: alternates_from_json(&alternates),
            provenance: provenance_from_json(&provenance),
            created_seq: created_seq as u64,
        })
    }

    async fn fetch_by_key(&self, key: &str) -> Result<Option<Entity>, GraphError> {
        let query = Query::new(
            r#"
            MATCH (e:Entity)
            WHERE e.id = $key OR $key IN e.alias_keys
            RETURN e.id as id, e.name as name, e.entity_type as entity_type,
                   e.properties as properties, e.alternates as alternates,
                   e.provenance as provenance, e.created_seq as created_seq
            LIMIT 1
            "#
            .to_string(),
        )
        .param("key", key.to_string());

        let mut result = self.graph.execute(query).await?;
        match result.next().await? {
            Some(row) => Ok(Some(Self::entity_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn write_entity_fields(&self, entity: &Entity) -> Result<(), GraphError> {
        let query = Query::new(
            r#"
            MATCH (e:Entity {id: $id})
            SET e.properties = $properties,
                e.alternates = $alternates,
                e.provenance = $provenance
            "#
            .to_string(),
        )
        .param("id", entity.id.clone())
        .param("properties", to_json(&entity.properties))
        .param("alternates", to_json(&entity.alternate_values))
        .param("provenance", to_json(&entity.provenance));
        self.graph.run(query).await?;
        Ok(())
    }

    fn rel_from_row(row: &neo4rs::Row) -> Result<Relationship, GraphError> {
        let id: String = row.get("rel_id").unwrap_or_default();
        let source: String = row
            .get("source")
            .map_err(|e| GraphError::Transient(e.to_string()))?;
        let target: String = row
            .get("target")
            .map_err(|e| GraphError::Transient(e.to_string()))?;
        let rel_type: String = row.get("rel_type").unwrap_or_default();
        let properties: String = row.get("properties").unwrap_or_else(|_| "{}".to_string());
        let provenance: String = row.get("provenance").unwrap_or_else(|_| "[]".to_string());
        Ok(Relationship {
            id,
            source,
            target,
            rel_type,
            properties: properties_from_json(&properties),
            provenance: provenance_from_json(&provenance),
        })
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn upsert_entity(&self, entity: NewEntity) -> Result<EntityId, GraphError> {
        let name = entity.name.trim().to_string();
        if name.is_empty() {
            return Err(GraphError::InvalidEntity(
                "canonical name must be non-empty".into(),
            ));
        }
        let key = natural_key(&name, &entity.entity_type);

        if let Some(mut existing) = self.fetch_by_key(&key).await? {
            merge_properties(
                &mut existing.properties,
                &mut existing.alternate_values,
                entity.properties,
            );
            existing.provenance.extend(entity.provenance);
            self.write_entity_fields(&existing).await?;
            return Ok(existing.id);
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let query = Query::new(
            r#"
            CREATE (e:Entity {
                id: $id, name: $name, entity_type: $entity_type,
                properties: $properties, alternates: $alternates,
                provenance: $provenance, created_seq: $created_seq,
                alias_keys: []
            })
            "#
            .to_string(),
        )
        .param("id", key.clone())
        .param("name", name)
        .param("entity_type", entity.entity_type.trim().to_string())
        .param("properties", to_json(&entity.properties))
        .param("alternates", "{}".to_string())
        .param("provenance", to_json(&entity.provenance))
        .param("created_seq", seq as i64);
        self.graph.run(query).await?;
        Ok(key)
    }

    async fn upsert_relationship(&self, rel: NewRelationship) -> Result<String, GraphError> {
        for endpoint in [&rel.source, &rel.target] {
            if self.fetch_by_key(endpoint).await?.is_none() {
                return Err(GraphError::not_found("entity", endpoint));
            }
        }

        let rel_type = rel.rel_type.trim().to_string();
        let query = Query::new(
            r#"
            MATCH (a:Entity {id: $source})
            MATCH (b:Entity {id: $target})
            MATCH (a)-[r:RELATION]->(b)
            WHERE toLower(r.type) = toLower($rel_type)
            RETURN r.rel_id as rel_id, r.provenance as provenance
            "#
            .to_string(),
        )
        .param("source", rel.source.clone())
        .param("target", rel.target.clone())
        .param("rel_type", rel_type.clone());

        let mut result = self.graph.execute(query).await?;
        if let Some(row) = result.next().await? {
            let rel_id: String = row.get("rel_id").unwrap_or_default();
            let raw: String = row.get("provenance").unwrap_or_else(|_| "[]".to_string());
            let mut provenance = provenance_from_json(&raw);
            provenance.extend(rel.provenance);
            let update = Query::new(
                r#"
                MATCH ()-[r:RELATION {rel_id: $rel_id}]->()
                SET r.provenance = $provenance
                "#
                .to_string(),
            )
            .param("rel_id", rel_id.clone())
            .param("provenance", to_json(&provenance));
            self.graph.run(update).await?;
            return Ok(rel_id);
        }

        let rel_id = uuid::Uuid::new_v4().to_string();
        let create = Query::new(
            r#"
            MATCH (a:Entity {id: $source})
            MATCH (b:Entity {id: $target})
            CREATE (a)-[r:RELATION {
                rel_id: $rel_id, type: $rel_type,
                properties: $properties, provenance: $provenance
            }]->(b)
            "#
            .to_string(),
        )
        .param("source", rel.source)
        .param("target", rel.target)
        .param("rel_id", rel_id.clone())
        .param("rel_type", rel_type)
        .param("properties", to_json(&rel.properties))
        .param("provenance", to_json(&rel.provenance));
        self.graph.run(create).await?;
        Ok(rel_id)
    }

    async fn entity(&self, id: &str) -> Result<Entity, GraphError> {
        self.fetch_by_key(id)
            .await?
            .ok_or_else(|| GraphError::not_found("entity", id))
    }

    async fn entities_by_type(&self, entity_type: &str) -> Result<Vec<Entity>, GraphError> {
        let query = Query::new(
            r#"
            MATCH (e:Entity)
            WHERE toLower(e.entity_type) = toLower($entity_type)
            RETURN e.id as id, e.name as name, e.entity_type as entity_type,
                   e.properties as properties, e.alternates as alternates,
                   e.provenance as provenance, e.created_seq as created_seq
            ORDER BY e.created_seq
            "#
            .to_string(),
        )
        .param("entity_type", entity_type.to_string());

        let mut result = self.graph.execute(query).await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            out.push(Self::entity_from_row(&row)?);
        }
        Ok(out)
    }

    async fn find_by_name(
        &self,
        name: &str,
        entity_type: Option<&str>,
    ) -> Result<Vec<Entity>, GraphError> {
        let needle = crate::model::normalize_name(name);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let mut cypher = String::from(
            r#"
            MATCH (e:Entity)
            WHERE toLower(e.name) CONTAINS $needle
            "#,
        );
        if entity_type.is_some() {
            cypher.push_str(" AND toLower(e.entity_type) = toLower($entity_type) ");
        }
        cypher.push_str(
            r#"
            RETURN e.id as id, e.name as name, e.entity_type as entity_type,
                   e.properties as properties, e.alternates as alternates,
                   e.provenance as provenance, e.created_seq as created_seq
            ORDER BY e.created_seq
            "#,
        );
        let mut query = Query::new(cypher).param("needle", needle);
        if let Some(t) = entity_type {
            query = query.param("entity_type", t.to_string());
        }

        let mut result = self.graph.execute(query).await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            out.push(Self::entity_from_row(&row)?);
        }
        Ok(out)
    }

    async fn neighbors(
        &self,
        id: &str,
        max_depth: usize,
        rel_filter: Option<&str>,
    ) -> Result<Vec<TraversalHit>, GraphError> {
        if self.fetch_by_key(id).await?.is_none() {
            return Err(GraphError::not_found("entity", id));
        }

        // The variable-length bound cannot be a parameter.
        let mut cypher = format!(
            r#"
            MATCH path = (start:Entity {{id: $id}})-[:RELATION*0..{}]-(n:Entity)
            "#,
            max_depth
        );
        if rel_filter.is_some() {
            cypher.push_str(
                " WHERE all(r IN relationships(path) WHERE toLower(r.type) = toLower($rel_type)) ",
            );
        }
        // Joined strings instead of list projections; split client-side.
        cypher.push_str(
            r#"
            RETURN n.id as id, n.name as name, n.entity_type as entity_type,
                   n.properties as properties, n.alternates as alternates,
                   n.provenance as provenance, n.created_seq as created_seq,
                   reduce(acc = '', x IN nodes(path) |
                       acc + CASE WHEN acc = '' THEN '' ELSE '\t' END + coalesce(x.name, '')
                   ) as path_names,
                   reduce(acc = '', r IN relationships(path) |
                       acc + CASE WHEN acc = '' THEN '' ELSE '\t' END + coalesce(r.type, '')
                   ) as path_rels,
                   length(path) as depth
            ORDER BY depth ASC
            "#,
        );
        let mut query = Query::new(cypher).param("id", id.to_string());
        if let Some(t) = rel_filter {
            query = query.param("rel_type", t.to_string());
        }

        let mut result = self.graph.execute(query).await?;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut hits = Vec::new();
        while let Some(row) = result.next().await? {
            let entity = Self::entity_from_row(&row)?;
            if !seen.insert(entity.id.clone()) {
                continue; // keep the shortest path only
            }
            let depth: i64 = row.get("depth").unwrap_or(0);
            let path_names: String = row.get("path_names").unwrap_or_default();
            let path_rels: String = row.get("path_rels").unwrap_or_default();
            hits.push(TraversalHit {
                entity,
                depth: depth as usize,
                path_names: split_joined(&path_names),
                path_rels: split_joined(&path_rels),
            });
        }
        Ok(hits)
    }

    async fn delete_by_provenance(&self, doc_id: &str) -> Result<DeleteOutcome, GraphError> {
        let mut outcome = DeleteOutcome::default();

        // Provenance lives in a JSON string, so the cascade is computed here
        // rather than in Cypher. Snapshot edges before any entity deletion
        // detaches them.
        let rels_snapshot = self.all_relationships().await?;
        let mut removed_entities: BTreeSet<String> = BTreeSet::new();
        for mut entity in self.all_entities().await? {
            let before = entity.provenance.len();
            entity.provenance.retain(|p| p.doc_id != doc_id);
            if entity.provenance.len() == before {
                continue;
            }
            if entity.provenance.is_empty() {
                removed_entities.insert(entity.id.clone());
                let query = Query::new(
                    "MATCH (e:Entity {id: $id}) DETACH DELETE e".to_string(),
                )
                .param("id", entity.id.clone());
                self.graph.run(query).await?;
                outcome.entities_removed += 1;
                outcome.removed_entity_ids.push(entity.id.clone());
            } else {
                self.write_entity_fields(&entity).await?;
                outcome.entities_retained += 1;
            }
        }

        for mut rel in rels_snapshot {
            if removed_entities.contains(&rel.source) || removed_entities.contains(&rel.target) {
                // DETACH DELETE above already removed the edge.
                outcome.relationships_removed += 1;
                continue;
            }
            let before = rel.provenance.len();
            rel.provenance.retain(|p| p.doc_id != doc_id);
            if rel.provenance.len() == before {
                continue;
            }
            if rel.provenance.is_empty() {
                let query =
                    Query::new("MATCH ()-[r:RELATION {rel_id: $rel_id}]->() DELETE r".to_string())
                        .param("rel_id", rel.id.clone());
                self.graph.run(query).await?;
                outcome.relationships_removed += 1;
            } else {
                let query = Query::new(
                    "MATCH ()-[r:RELATION {rel_id: $rel_id}]->() SET r.provenance = $provenance"
                        .to_string(),
                )
                .param("rel_id", rel.id.clone())
                .param("provenance", to_json(&rel.provenance));
                self.graph.run(query).await?;
            }
        }

        let mut result = self
            .graph
            .execute(
                Query::new(
                    "MATCH (c:Chunk {doc_id: $doc_id}) DELETE c RETURN count(c) as removed"
                        .to_string(),
                )
                .param("doc_id", doc_id.to_string()),
            )
            .await?;
        if let Some(row) = result.next().await? {
            let removed: i64 = row.get("removed").unwrap_or(0);
            outcome.chunks_removed = removed as usize;
        }

        Ok(outcome)
    }

    async fn stats(&self) -> Result<GraphStats, GraphError> {
        let mut stats = GraphStats::default();

        let mut result = self
            .graph
            .execute(Query::new(
                r#"
                MATCH (e:Entity)
                RETURN e.entity_type as entity_type, count(e) as count
                "#
                .to_string(),
            ))
            .await?;
        while let Some(row) = result.next().await? {
            let entity_type: String = row.get("entity_type").unwrap_or_default();
            let count: i64 = row.get("count").unwrap_or(0);
            stats.entities += count as usize;
            stats.entities_by_type.insert(entity_type, count as usize);
        }

        let mut result = self
            .graph
            .execute(Query::new(
                "MATCH ()-[r:RELATION]->() RETURN count(r) as count".to_string(),
            ))
            .await?;
        if let Some(row) = result.next().await? {
            let count: i64 = row.get("count").unwrap_or(0);
            stats.relationships = count as usize;
        }

        let mut result = self
            .graph
            .execute(Query::new(
                "MATCH (c:Chunk) RETURN count(c) as count".to_string(),
            ))
            .await?;
        if let Some(row) = result.next().await? {
            let count: i64 = row.get("count").unwrap_or(0);
            stats.chunks = count as usize;
        }

        Ok(stats)
    }

    async fn upsert_chunk(&self, chunk: StoredChunk) -> Result<(), GraphError> {
        let query = Query::new(
            r#"
            MERGE (c:Chunk {chunk_id: $chunk_id})
            SET c.doc_id = $doc_id, c.text = $text, c.start = $start, c.end = $end
            "#
            .to_string(),
        )
        .param("chunk_id", chunk.chunk_id)
        .param("doc_id", chunk.doc_id)
        .param("text", chunk.text)
        .param("start", chunk.start as i64)
        .param("end", chunk.end as i64);
        self.graph.run(query).await?;
        Ok(())
    }

    async fn chunks(&self) -> Result<Vec<StoredChunk>, GraphError> {
        let mut result = self
            .graph
            .execute(Query::new(
                r#"
                MATCH (c:Chunk)
                RETURN c.chunk_id as chunk_id, c.doc_id as doc_id, c.text as text,
                       c.start as start, c.end as end
                ORDER BY c.chunk_id
                "#
                .to_string(),
            ))
            .await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            let start: i64 = row.get("start").unwrap_or(0);
            let end: i64 = row.get("end").unwrap_or(0);
            out.push(StoredChunk {
                chunk_id: row.get("chunk_id").unwrap_or_default(),
                doc_id: row.get("doc_id").unwrap_or_default(),
                text: row.get("text").unwrap_or_default(),
                start: start as usize,
                end: end as usize,
            });
        }
        Ok(out)
    }

    async fn all_entities(&self) -> Result<Vec<Entity>, GraphError> {
        let mut result = self
            .graph
            .execute(Query::new(
                r#"
                MATCH (e:Entity)
                RETURN e.id as id, e.name as name, e.entity_type as entity_type,
                       e.properties as properties, e.alternates as alternates,
                       e.provenance as provenance, e.created_seq as created_seq
                ORDER BY e.created_seq
                "#
                .to_string(),
            ))
            .await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            out.push(Self::entity_from_row(&row)?);
        }
        Ok(out)
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>, GraphError> {
        let mut result = self
            .graph
            .execute(Query::new(
                r#"
                MATCH (a:Entity)-[r:RELATION]->(b:Entity)
                RETURN r.rel_id as rel_id, a.id as source, b.id as target,
                       r.type as rel_type, r.properties as properties,
                       r.provenance as provenance
                "#
                .to_string(),
            ))
            .await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            out.push(Self::rel_from_row(&row)?);
        }
        Ok(out)
    }

    async fn merge_entities(&self, keep: &str, remove: &str) -> Result<MergeOutcome, GraphError> {
        if keep == remove {
            return Ok(MergeOutcome::default());
        }
        let mut canonical = self.entity(keep).await?;
        let removed = self.entity(remove).await?;

        merge_properties(
            &mut canonical.properties,
            &mut canonical.alternate_values,
            removed.properties.clone(),
        );
        canonical
            .provenance
            .extend(removed.provenance.iter().cloned());
        self.write_entity_fields(&canonical).await?;

        // Remember the absorbed key so later upserts resolve here.
        let alias = Query::new(
            r#"
            MATCH (e:Entity {id: $keep})
            SET e.alias_keys = e.alias_keys + $alias
            "#
            .to_string(),
        )
        .param("keep", keep.to_string())
        .param("alias", remove.to_string());
        self.graph.run(alias).await?;

        let mut outcome = MergeOutcome::default();
        let snapshot = self.all_relationships().await?;
        let mut known: BTreeSet<String> = snapshot.iter().map(|r| r.id.clone()).collect();
        for rel in snapshot {
            if rel.source != remove && rel.target != remove {
                continue;
            }
            known.remove(&rel.id);
            let delete = Query::new(
                "MATCH ()-[r:RELATION {rel_id: $rel_id}]->() DELETE r".to_string(),
            )
            .param("rel_id", rel.id.clone());
            self.graph.run(delete).await?;

            let source = if rel.source == remove { keep } else { rel.source.as_str() };
            let target = if rel.target == remove { keep } else { rel.target.as_str() };
            if source == target {
                outcome.deduplicated_relationships += 1;
                continue;
            }

            let result_id = self
                .upsert_relationship(NewRelationship {
                    source: source.to_string(),
                    target: target.to_string(),
                    rel_type: rel.rel_type.clone(),
                    properties: rel.properties.clone(),
                    provenance: rel.provenance.clone(),
                })
                .await?;
            if known.contains(&result_id) {
                // Landed on an edge that already existed between the pair.
                outcome.deduplicated_relationships += 1;
            } else {
                known.insert(result_id);
                outcome.redirected_relationships += 1;
            }
        }

        let drop = Query::new("MATCH (e:Entity {id: $id}) DETACH DELETE e".to_string())
            .param("id", remove.to_string());
        self.graph.run(drop).await?;

        Ok(outcome)
    }
}
