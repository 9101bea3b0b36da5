use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use graph::{GraphError, GraphService};

#[derive(Debug, Clone, Serialize)]
pub struct EntityTypeSummary {
    pub name: String,
    pub count: usize,
    /// Distinct property names observed on entities of this type.
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipTypeSummary {
    pub name: String,
    pub count: usize,
}

/// Schema-level view of the live graph.
#[derive(Debug, Clone, Serialize)]
pub struct OntologySummary {
    pub entity_types: Vec<EntityTypeSummary>,
    pub relationship_types: Vec<RelationshipTypeSummary>,
    pub total_entities: usize,
    pub total_relationships: usize,
}

pub async fn summarize(graph: &GraphService) -> Result<OntologySummary, GraphError> {
    let entities = graph.all_entities().await?;
    let relationships = graph.all_relationships().await?;

    let mut types: BTreeMap<String, (usize, BTreeSet<String>)> = BTreeMap::new();
    for entity in &entities {
        let slot = types.entry(entity.entity_type.clone()).or_default();
        slot.0 += 1;
        slot.1.extend(entity.properties.keys().cloned());
    }

    let mut rel_types: BTreeMap<String, usize> = BTreeMap::new();
    for rel in &relationships {
        *rel_types.entry(rel.rel_type.clone()).or_default() += 1;
    }

    Ok(OntologySummary {
        entity_types: types
            .into_iter()
            .map(|(name, (count, properties))| EntityTypeSummary {
                name,
                count,
                properties: properties.into_iter().collect(),
            })
            .collect(),
        relationship_types: rel_types
            .into_iter()
            .map(|(name, count)| RelationshipTypeSummary { name, count })
            .collect(),
        total_entities: entities.len(),
        total_relationships: relationships.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{NewEntity, NewRelationship};

    #[tokio::test]
    async fn summary_groups_types_and_properties() {
        let graph = GraphService::in_memory();
        let apple = graph
            .upsert_entity(
                NewEntity::new("Apple Inc.", "Company")
                    .with_property("location", "Cupertino".into()),
            )
            .await
            .unwrap();
        let jobs = graph
            .upsert_entity(NewEntity::new("Steve Jobs", "Person"))
            .await
            .unwrap();
        graph
            .upsert_relationship(NewRelationship::new(apple, "Founder", jobs))
            .await
            .unwrap();

        let summary = summarize(&graph).await.unwrap();
        assert_eq!(summary.total_entities, 2);
        assert_eq!(summary.total_relationships, 1);

        let company = summary
            .entity_types
            .iter()
            .find(|t| t.name == "Company")
            .unwrap();
        assert_eq!(company.count, 1);
        assert_eq!(company.properties, vec!["location".to_string()]);

        assert_eq!(summary.relationship_types.len(), 1);
        assert_eq!(summary.relationship_types[0].name, "Founder");
    }
}
