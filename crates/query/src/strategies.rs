use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use graph::GraphService;
use index::{Embedder, VectorIndex};

use crate::evidence::{EvidenceItem, EvidenceSource, StrategyError};
use crate::planner::FilterPattern;

/// Cooperative cancellation signal, checked at traversal/batch boundaries.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Traversal confidence decays with depth: 1 / (1 + depth).
pub fn depth_confidence(depth: usize) -> f32 {
    1.0 / (1.0 + depth as f32)
}

/// Embed the query and take the top-k nearest chunks/entities; confidence is
/// the similarity score.
pub async fn vector_search(
    index: &VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
    cancel: &CancelFlag,
) -> Result<Vec<EvidenceItem>, StrategyError> {
    if cancel.is_cancelled() {
        return Err(StrategyError::Cancelled);
    }
    let query_vector = embedder
        .embed(query)
        .await
        .map_err(|e| StrategyError::Backend(e.to_string()))?;
    if cancel.is_cancelled() {
        return Err(StrategyError::Cancelled);
    }

    let hits = index.search(&query_vector, k);
    Ok(hits
        .into_iter()
        .map(|hit| {
            EvidenceItem::new(EvidenceSource::Vector, hit.payload.text.clone(), hit.score)
                .with_meta("similarity", hit.score as f64)
                .with_meta("id", hit.id)
                .with_meta("doc_id", hit.payload.doc_id)
        })
        .collect())
}

/// Fuzzy-match query mentions against the graph and run a bounded BFS from
/// each match; one evidence item per discovered path, keeping the shortest
/// path per entity.
pub async fn graph_search(
    graph: &GraphService,
    mentions: &[String],
    max_depth: usize,
    cancel: &CancelFlag,
) -> Result<Vec<EvidenceItem>, StrategyError> {
    const MATCHES_PER_MENTION: usize = 3;

    let mut best: std::collections::BTreeMap<String, (usize, EvidenceItem)> = Default::default();

    for mention in mentions {
        if cancel.is_cancelled() {
            break;
        }
        let matches = graph.find_by_name(mention, None).await?;
        for start in matches.into_iter().take(MATCHES_PER_MENTION) {
            if cancel.is_cancelled() {
                break;
            }
            let hits = graph.neighbors(&start.id, max_depth, None).await?;
            for hit in hits {
                let item = EvidenceItem::new(
                    EvidenceSource::Graph,
                    hit.describe(),
                    depth_confidence(hit.depth),
                )
                .with_meta("depth", hit.depth as u64)
                .with_meta("entity_id", hit.entity.id.clone())
                .with_meta("entity_name", hit.entity.name.clone())
                .with_meta("entity_type", hit.entity.entity_type.clone());

                match best.get(&hit.entity.id) {
                    Some((depth, _)) if *depth <= hit.depth => {}
                    _ => {
                        best.insert(hit.entity.id.clone(), (hit.depth, item));
                    }
                }
            }
        }
    }

    Ok(best.into_values().map(|(_, item)| item).collect())
}

/// Match recognized attribute constraints against entity properties; exact
/// matches score high, substring matches lower.
pub async fn filter_search(
    graph: &GraphService,
    filters: &[FilterPattern],
    cancel: &CancelFlag,
) -> Result<Vec<EvidenceItem>, StrategyError> {
    const EXACT_CONFIDENCE: f32 = 0.9;
    const SUBSTRING_CONFIDENCE: f32 = 0.7;

    let entities = graph.all_entities().await?;
    let mut items = Vec::new();

    for filter in filters {
        if cancel.is_cancelled() {
            break;
        }
        let wanted = filter.value.to_lowercase();
        for entity in &entities {
            let value = if filter.property == "name" {
                Some(entity.name.clone())
            } else {
                entity
                    .properties
                    .get(&filter.property)
                    .map(property_as_text)
            };
            let Some(value) = value else { continue };

            let confidence = if value.eq_ignore_ascii_case(&filter.value) {
                EXACT_CONFIDENCE
            } else if value.to_lowercase().contains(&wanted) {
                SUBSTRING_CONFIDENCE
            } else {
                continue;
            };

            items.push(
                EvidenceItem::new(
                    EvidenceSource::Filter,
                    format!(
                        "{} ({}): {} = {}",
                        entity.name, entity.entity_type, filter.property, value
                    ),
                    confidence,
                )
                .with_meta("entity_id", entity.id.clone())
                .with_meta("property", filter.property.clone())
                .with_meta("value", value)
                .with_meta("exact", confidence == EXACT_CONFIDENCE),
            );
        }
    }

    Ok(items)
}

fn property_as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{NewEntity, NewRelationship};
    use index::{HashEmbedder, PayloadKind, VectorPayload};

    #[test]
    fn depth_confidence_is_monotonically_non_increasing() {
        let mut last = f32::INFINITY;
        for depth in 0..10 {
            let c = depth_confidence(depth);
            assert!(c <= last);
            last = c;
        }
        assert_eq!(depth_confidence(0), 1.0);
        assert_eq!(depth_confidence(1), 0.5);
    }

    #[tokio::test]
    async fn vector_search_emits_one_item_per_hit() {
        let index = VectorIndex::new();
        let embedder = HashEmbedder::new(32);
        for text in ["apple founding history", "unrelated cooking recipe"] {
            let v = embedder.embed(text).await.unwrap();
            index.add(
                text,
                v,
                VectorPayload {
                    kind: PayloadKind::Chunk,
                    doc_id: "d1".into(),
                    text: text.into(),
                    entity_id: None,
                },
            );
        }

        let items = vector_search(
            &index,
            &embedder,
            "apple founding history",
            5,
            &CancelFlag::new(),
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 2);
        // The identical text must rank first with similarity ~1.
        assert_eq!(items[0].content, "apple founding history");
        assert!(items[0].confidence > 0.99);
        assert!(items[0].confidence >= items[1].confidence);
    }

    #[tokio::test]
    async fn graph_search_decays_confidence_with_depth() {
        let graph = GraphService::in_memory();
        let apple = graph
            .upsert_entity(NewEntity::new("Apple Inc.", "Company"))
            .await
            .unwrap();
        let jobs = graph
            .upsert_entity(NewEntity::new("Steve Jobs", "Person"))
            .await
            .unwrap();
        let next = graph
            .upsert_entity(NewEntity::new("NeXT", "Company"))
            .await
            .unwrap();
        graph
            .upsert_relationship(NewRelationship::new(apple.clone(), "Founder", jobs.clone()))
            .await
            .unwrap();
        graph
            .upsert_relationship(NewRelationship::new(next, "Founder", jobs))
            .await
            .unwrap();

        let items = graph_search(
            &graph,
            &["Apple Inc.".to_string()],
            2,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        let by_name = |name: &str| {
            items
                .iter()
                .find(|i| i.metadata["entity_name"] == name)
                .unwrap()
        };
        assert_eq!(by_name("Apple Inc.").confidence, 1.0);
        assert_eq!(by_name("Steve Jobs").confidence, 0.5);
        assert!((by_name("NeXT").confidence - 1.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn cancelled_graph_search_returns_collected_evidence() {
        let graph = GraphService::in_memory();
        graph
            .upsert_entity(NewEntity::new("Apple Inc.", "Company"))
            .await
            .unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let items = graph_search(&graph, &["Apple Inc.".to_string()], 2, &cancel)
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn filter_search_scores_exact_above_substring() {
        let graph = GraphService::in_memory();
        graph
            .upsert_entity(
                NewEntity::new("Apple Inc.", "Company")
                    .with_property("location", "Cupertino".into()),
            )
            .await
            .unwrap();
        graph
            .upsert_entity(
                NewEntity::new("Apple Store", "Company")
                    .with_property("location", "Cupertino Square".into()),
            )
            .await
            .unwrap();
        graph
            .upsert_entity(
                NewEntity::new("Globex Corp", "Company")
                    .with_property("location", "Springfield".into()),
            )
            .await
            .unwrap();

        let filters = vec![FilterPattern {
            property: "location".into(),
            value: "Cupertino".into(),
        }];
        let mut items = filter_search(&graph, &filters, &CancelFlag::new())
            .await
            .unwrap();
        items.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].confidence, 0.9);
        assert!(items[0].content.starts_with("Apple Inc."));
        assert_eq!(items[1].confidence, 0.7);
        assert!(items[1].content.starts_with("Apple Store"));
    }
}
