use regex::Regex;
use serde::Serialize;

/// Per-strategy enablement, each independently toggleable.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StrategyToggles {
    pub vector: bool,
    pub graph: bool,
    pub filter: bool,
}

impl Default for StrategyToggles {
    fn default() -> Self {
        Self {
            vector: true,
            graph: true,
            filter: true,
        }
    }
}

/// A recognized attribute constraint from the query text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPattern {
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub run_vector: bool,
    pub run_graph: bool,
    pub run_filter: bool,
    pub entity_mentions: Vec<String>,
    pub filters: Vec<FilterPattern>,
}

impl QueryPlan {
    pub fn strategies_planned(&self) -> usize {
        usize::from(self.run_vector) + usize::from(self.run_graph) + usize::from(self.run_filter)
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.run_vector {
            parts.push("vector".to_string());
        }
        if self.run_graph {
            parts.push(format!("graph({})", self.entity_mentions.join(", ")));
        }
        if self.run_filter {
            let filters: Vec<String> = self
                .filters
                .iter()
                .map(|f| format!("{}={}", f.property, f.value))
                .collect();
            parts.push(format!("filter({})", filters.join(", ")));
        }
        if parts.is_empty() {
            parts.push("none".to_string());
        }
        parts.join(" + ")
    }
}

/// Question words that a capitalized-phrase scan should not mistake for an
/// entity mention.
const STOPWORDS: &[&str] = &[
    "who", "what", "where", "when", "why", "how", "which", "whose", "is", "are", "was", "were",
    "does", "do", "did", "can", "could", "list", "find", "show", "tell", "give", "the", "a", "an",
];

/// Deterministic rule set, not a learned policy: capitalized mentions gate
/// graph traversal, recognized attribute patterns gate filtering.
pub fn plan_query(query: &str, toggles: StrategyToggles) -> QueryPlan {
    let entity_mentions = extract_mentions(query);
    let filters = extract_filters(query);

    QueryPlan {
        run_vector: toggles.vector,
        run_graph: toggles.graph && !entity_mentions.is_empty(),
        run_filter: toggles.filter && !filters.is_empty(),
        entity_mentions,
        filters,
    }
}

fn extract_mentions(query: &str) -> Vec<String> {
    let pattern =
        Regex::new(r"[A-Z][\w&.]*(?:\s+[A-Z][\w&.]*)*").expect("mention pattern");
    let mut mentions = Vec::new();
    for m in pattern.find_iter(query) {
        let phrase = m.as_str().trim_end_matches(['?', '!', ',']);
        let lowered = phrase.to_lowercase();
        if phrase.is_empty() || STOPWORDS.contains(&lowered.as_str()) {
            continue;
        }
        if !mentions.iter().any(|existing: &String| existing == phrase) {
            mentions.push(phrase.to_string());
        }
    }
    mentions
}

/// Recognized-pattern grammar:
///   `in <Name>` / `located in <Name>`  -> location
///   `manages <Name>` / `managing <Name>` -> manages
///   `named <Name>` / `called <Name>` -> name
fn extract_filters(query: &str) -> Vec<FilterPattern> {
    let rules = [
        (
            r"\b(?:located\s+in|in)\s+([A-Z][\w]*(?:\s+[A-Z][\w]*)*)",
            "location",
        ),
        (
            r"\b(?:manages|managing)\s+(?:the\s+)?([A-Z][\w]*(?:\s+[A-Z][\w]*)*)",
            "manages",
        ),
        (
            r"\b(?:named|called)\s+([A-Z][\w]*(?:\s+[A-Z][\w]*)*)",
            "name",
        ),
    ];

    let mut filters = Vec::new();
    for (pattern, property) in rules {
        let re = Regex::new(pattern).expect("filter pattern");
        for caps in re.captures_iter(query) {
            if let Some(m) = caps.get(1) {
                let filter = FilterPattern {
                    property: property.to_string(),
                    value: m.as_str().to_string(),
                };
                if !filters.contains(&filter) {
                    filters.push(filter);
                }
            }
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_skip_question_words() {
        let plan = plan_query("Who founded Apple Inc.?", StrategyToggles::default());
        assert_eq!(plan.entity_mentions, vec!["Apple Inc."]);
        assert!(plan.run_graph);
    }

    #[test]
    fn no_mentions_skips_graph_strategy() {
        let plan = plan_query(
            "explain how the ingestion pipeline works",
            StrategyToggles::default(),
        );
        assert!(plan.entity_mentions.is_empty());
        assert!(!plan.run_graph);
        assert!(plan.run_vector);
    }

    #[test]
    fn location_pattern_enables_filtering() {
        let plan = plan_query("Which companies are in Cupertino?", StrategyToggles::default());
        assert!(plan.run_filter);
        assert_eq!(
            plan.filters,
            vec![FilterPattern {
                property: "location".into(),
                value: "Cupertino".into()
            }]
        );
    }

    #[test]
    fn manages_pattern_enables_filtering() {
        let plan = plan_query("Who is managing the Engineering Team?", StrategyToggles::default());
        assert!(
            plan.filters
                .iter()
                .any(|f| f.property == "manages" && f.value == "Engineering Team")
        );
    }

    #[test]
    fn no_attribute_skips_filtering() {
        let plan = plan_query("Who founded Apple Inc.?", StrategyToggles::default());
        assert!(!plan.run_filter);
    }

    #[test]
    fn toggles_disable_strategies() {
        let plan = plan_query(
            "Which companies are in Cupertino?",
            StrategyToggles {
                vector: false,
                graph: false,
                filter: false,
            },
        );
        assert_eq!(plan.strategies_planned(), 0);
    }

    #[test]
    fn planning_is_deterministic() {
        let a = plan_query("Who founded Apple Inc.?", StrategyToggles::default());
        let b = plan_query("Who founded Apple Inc.?", StrategyToggles::default());
        assert_eq!(a.entity_mentions, b.entity_mentions);
        assert_eq!(a.filters, b.filters);
    }
}
