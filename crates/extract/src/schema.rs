use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Malformed or unusable model output; recovered via the rule-based
    /// fallback upstream.
    #[error("malformed extraction output: {0}")]
    Format(String),

    #[error("extraction backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_name: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub target_name: String,
}

/// Validated extraction result for one chunk. Transient: merged into the
/// graph store, never persisted as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ontology {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

impl Ontology {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Parse-then-validate boundary for the model's untrusted output.
///
/// Tolerates prose around the JSON object, alternative field spellings, and
/// partially valid items; anything that cannot be validated into a strict
/// record is dropped. Fails only when nothing usable remains.
pub fn parse_ontology(raw: &str) -> Result<Ontology, ExtractError> {
    let json_start = raw
        .find('{')
        .ok_or_else(|| ExtractError::Format("no JSON object in output".into()))?;
    let json_end = raw
        .rfind('}')
        .ok_or_else(|| ExtractError::Format("unterminated JSON object".into()))?;
    if json_end < json_start {
        return Err(ExtractError::Format("unterminated JSON object".into()));
    }

    let value: Value = serde_json::from_str(&raw[json_start..=json_end])
        .map_err(|e| ExtractError::Format(format!("invalid JSON: {e}")))?;

    let mut ontology = Ontology::default();
    let mut seen = std::collections::BTreeSet::new();

    if let Some(items) = value.get("entities").and_then(Value::as_array) {
        for item in items {
            let Some(name) = string_field(item, &["name"]) else {
                continue;
            };
            let entity_type =
                string_field(item, &["type", "entity_type", "label"]).unwrap_or_else(|| "Entity".into());
            if !seen.insert((name.to_lowercase(), entity_type.to_lowercase())) {
                continue;
            }
            ontology.entities.push(ExtractedEntity {
                name,
                entity_type,
                properties: scalar_properties(item),
            });
        }
    }

    let rel_items = value
        .get("relationships")
        .or_else(|| value.get("relations"))
        .and_then(Value::as_array);
    if let Some(items) = rel_items {
        for item in items {
            let Some(source) = string_field(item, &["sourceName", "source", "from"]) else {
                continue;
            };
            let Some(target) = string_field(item, &["targetName", "target", "to"]) else {
                continue;
            };
            let rel_type =
                string_field(item, &["type", "relation", "rel_type"]).unwrap_or_else(|| "RelatedTo".into());
            if source.eq_ignore_ascii_case(&target) {
                continue;
            }
            ontology.relationships.push(ExtractedRelationship {
                source_name: source,
                rel_type,
                target_name: target,
            });
        }
    }

    if ontology.is_empty() {
        return Err(ExtractError::Format(
            "no valid entities or relationships in output".into(),
        ));
    }
    Ok(ontology)
}

fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = item.get(*key).and_then(Value::as_str) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Property maps hold scalars only; nested structures from the model are
/// dropped rather than trusted.
fn scalar_properties(item: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    let source = item
        .get("properties")
        .or_else(|| item.get("attributes"))
        .and_then(Value::as_object);
    if let Some(map) = source {
        for (key, value) in map {
            match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                    out.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_output() {
        let raw = r#"{
            "entities": [
                {"name": "Apple Inc.", "type": "Company", "properties": {"industry": "Technology"}},
                {"name": "Steve Jobs", "type": "Person"}
            ],
            "relationships": [
                {"sourceName": "Apple Inc.", "type": "Founder", "targetName": "Steve Jobs"}
            ]
        }"#;
        let ontology = parse_ontology(raw).unwrap();
        assert_eq!(ontology.entities.len(), 2);
        assert_eq!(ontology.relationships.len(), 1);
        assert_eq!(
            ontology.entities[0].properties.get("industry").unwrap(),
            "Technology"
        );
    }

    #[test]
    fn tolerates_prose_around_the_json() {
        let raw = r#"Sure, here is the extraction:
        {"entities": [{"name": "Cupertino", "type": "Location"}], "relationships": []}
        Let me know if you need anything else."#;
        let ontology = parse_ontology(raw).unwrap();
        assert_eq!(ontology.entities[0].name, "Cupertino");
    }

    #[test]
    fn accepts_alternate_field_spellings() {
        let raw = r#"{
            "entities": [{"name": "HR", "label": "Department", "attributes": {"size": 12}}],
            "relations": [{"source": "Alice Smith", "relation": "MemberOf", "target": "HR"}]
        }"#;
        let ontology = parse_ontology(raw).unwrap();
        assert_eq!(ontology.entities[0].entity_type, "Department");
        assert_eq!(ontology.relationships[0].rel_type, "MemberOf");
    }

    #[test]
    fn drops_invalid_items_keeps_valid_ones() {
        let raw = r#"{
            "entities": [
                {"name": "", "type": "Person"},
                {"type": "Person"},
                {"name": "Steve Jobs", "type": "Person", "properties": {"nested": {"a": 1}}}
            ],
            "relationships": [
                {"sourceName": "Steve Jobs", "type": "Founder"},
                {"sourceName": "Steve Jobs", "type": "Knows", "targetName": "steve jobs"}
            ]
        }"#;
        let ontology = parse_ontology(raw).unwrap();
        assert_eq!(ontology.entities.len(), 1);
        assert!(ontology.entities[0].properties.is_empty());
        assert!(ontology.relationships.is_empty());
    }

    #[test]
    fn rejects_output_with_nothing_usable() {
        assert!(matches!(
            parse_ontology("no json here at all"),
            Err(ExtractError::Format(_))
        ));
        assert!(matches!(
            parse_ontology(r#"{"entities": [], "relationships": []}"#),
            Err(ExtractError::Format(_))
        ));
        assert!(matches!(
            parse_ontology(r#"{"entities": [{]}"#),
            Err(ExtractError::Format(_))
        ));
    }
}
