pub mod similarity;

pub use similarity::name_similarity;

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use graph::{Entity, GraphService};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Pairs scoring at or above this merge.
    pub similarity_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveReport {
    pub total_entities: usize,
    pub groups_examined: usize,
    pub merged_entities: usize,
    pub redirected_relationships: usize,
    pub deduplicated_relationships: usize,
}

/// Merges entities that denote the same real-world object.
///
/// Entities are grouped by type; within a group, pairwise name similarity at
/// or above the threshold marks a duplicate cluster. The canonical entity is
/// the one with the most provenance, ties broken by earliest creation.
/// Idempotent: a second pass over a stable graph changes nothing.
pub struct EntityResolver {
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub async fn resolve(&self, graph: &GraphService) -> Result<ResolveReport> {
        // Whole-graph exclusive section keeps merge+redirect atomic with
        // respect to concurrent resolver runs.
        let _guard = graph.merge_guard().await;

        let entities = graph.all_entities().await?;
        let mut report = ResolveReport {
            total_entities: entities.len(),
            ..Default::default()
        };

        let mut groups: BTreeMap<String, Vec<Entity>> = BTreeMap::new();
        for entity in entities {
            groups
                .entry(entity.entity_type.to_lowercase())
                .or_default()
                .push(entity);
        }

        for (entity_type, mut group) in groups {
            report.groups_examined += 1;
            group.sort_by_key(|e| e.created_seq);

            let clusters = self.find_duplicates(&group);
            for cluster in clusters {
                let canonical = pick_canonical(&cluster);
                for other in &cluster {
                    if other.id == canonical.id {
                        continue;
                    }
                    debug!(
                        entity_type = %entity_type,
                        keep = %canonical.name,
                        remove = %other.name,
                        "merging duplicate entities"
                    );
                    let outcome = graph.merge_entities(&canonical.id, &other.id).await?;
                    report.merged_entities += 1;
                    report.redirected_relationships += outcome.redirected_relationships;
                    report.deduplicated_relationships += outcome.deduplicated_relationships;
                }
            }
        }

        if report.merged_entities > 0 {
            info!(
                merged = report.merged_entities,
                total = report.total_entities,
                "entity resolution pass complete"
            );
        }
        Ok(report)
    }

    fn find_duplicates<'a>(&self, group: &'a [Entity]) -> Vec<Vec<&'a Entity>> {
        let mut clusters = Vec::new();
        let mut taken = vec![false; group.len()];

        for i in 0..group.len() {
            if taken[i] {
                continue;
            }
            taken[i] = true;
            let mut cluster = vec![&group[i]];
            for j in (i + 1)..group.len() {
                if taken[j] {
                    continue;
                }
                let score = name_similarity(&group[i].name, &group[j].name);
                if score >= self.config.similarity_threshold {
                    taken[j] = true;
                    cluster.push(&group[j]);
                }
            }
            if cluster.len() > 1 {
                clusters.push(cluster);
            }
        }
        clusters
    }
}

fn pick_canonical<'a>(cluster: &[&'a Entity]) -> &'a Entity {
    cluster
        .iter()
        .copied()
        .min_by(|a, b| {
            b.provenance
                .len()
                .cmp(&a.provenance.len())
                .then(a.created_seq.cmp(&b.created_seq))
        })
        .expect("cluster is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{NewEntity, NewRelationship, Provenance};

    fn resolver(threshold: f64) -> EntityResolver {
        EntityResolver::new(ResolverConfig {
            similarity_threshold: threshold,
        })
    }

    async fn seeded_graph() -> (GraphService, String, String, String) {
        let graph = GraphService::in_memory();
        let apple = graph
            .upsert_entity(
                NewEntity::new("Apple Inc.", "Company").with_provenance(Provenance::new("d1", "c1")),
            )
            .await
            .unwrap();
        let jobs = graph
            .upsert_entity(
                NewEntity::new("Steve Jobs", "Person")
                    .with_provenance(Provenance::new("d1", "c1"))
                    .with_provenance(Provenance::new("d1", "c2")),
            )
            .await
            .unwrap();
        let s_jobs = graph
            .upsert_entity(
                NewEntity::new("S. Jobs", "Person").with_provenance(Provenance::new("d2", "c9")),
            )
            .await
            .unwrap();
        graph
            .upsert_relationship(NewRelationship::new(apple.clone(), "Founder", jobs.clone()))
            .await
            .unwrap();
        graph
            .upsert_relationship(NewRelationship::new(apple.clone(), "Founder", s_jobs.clone()))
            .await
            .unwrap();
        (graph, apple, jobs, s_jobs)
    }

    #[tokio::test]
    async fn merges_similar_names_above_threshold() {
        let (graph, _apple, jobs, s_jobs) = seeded_graph().await;

        let report = resolver(0.45).resolve(&graph).await.unwrap();
        assert_eq!(report.merged_entities, 1);

        // Canonical entity has the larger provenance set.
        let merged = graph.entity(&jobs).await.unwrap();
        assert_eq!(merged.name, "Steve Jobs");
        assert_eq!(merged.provenance.len(), 3);
        assert!(graph.entity(&s_jobs).await.is_err());

        // Parallel Founder edges collapsed into one.
        assert_eq!(graph.stats().await.unwrap().relationships, 1);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let (graph, ..) = seeded_graph().await;

        let first = resolver(0.45).resolve(&graph).await.unwrap();
        assert_eq!(first.merged_entities, 1);
        let stats_after_first = graph.stats().await.unwrap();

        let second = resolver(0.45).resolve(&graph).await.unwrap();
        assert_eq!(second.merged_entities, 0);
        let stats_after_second = graph.stats().await.unwrap();
        assert_eq!(stats_after_first.entities, stats_after_second.entities);
        assert_eq!(
            stats_after_first.relationships,
            stats_after_second.relationships
        );
    }

    #[tokio::test]
    async fn default_threshold_keeps_distinct_people_apart() {
        let graph = GraphService::in_memory();
        graph
            .upsert_entity(NewEntity::new("Steve Jobs", "Person"))
            .await
            .unwrap();
        graph
            .upsert_entity(NewEntity::new("Steve Wozniak", "Person"))
            .await
            .unwrap();

        let report = EntityResolver::new(ResolverConfig::default())
            .resolve(&graph)
            .await
            .unwrap();
        assert_eq!(report.merged_entities, 0);
        assert_eq!(graph.stats().await.unwrap().entities, 2);
    }

    #[tokio::test]
    async fn matching_names_of_different_types_do_not_merge() {
        let graph = GraphService::in_memory();
        graph
            .upsert_entity(NewEntity::new("Mercury", "Planet"))
            .await
            .unwrap();
        graph
            .upsert_entity(NewEntity::new("Mercury", "Element"))
            .await
            .unwrap();

        let report = resolver(0.5).resolve(&graph).await.unwrap();
        assert_eq!(report.merged_entities, 0);
    }

    #[tokio::test]
    async fn tie_break_prefers_earliest_created() {
        let graph = GraphService::in_memory();
        let first = graph
            .upsert_entity(
                NewEntity::new("Acme Corporation", "Company")
                    .with_provenance(Provenance::new("d1", "c1")),
            )
            .await
            .unwrap();
        let second = graph
            .upsert_entity(
                NewEntity::new("Acme Corp", "Company").with_provenance(Provenance::new("d2", "c2")),
            )
            .await
            .unwrap();

        resolver(0.45).resolve(&graph).await.unwrap();
        assert!(graph.entity(&first).await.is_ok());
        assert!(graph.entity(&second).await.is_err());
    }
}
