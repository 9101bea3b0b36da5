pub mod fallback;
pub mod llm;
pub mod prompt;
pub mod schema;

pub use fallback::RuleBasedExtractor;
pub use llm::OllamaClient;
pub use schema::{
    ExtractError, ExtractedEntity, ExtractedRelationship, Ontology, parse_ontology,
};

use tracing::warn;

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub ontology: Ontology,
    /// True when the rule-based extractor produced the result.
    pub used_fallback: bool,
}

/// Ontology extraction front door: the model first when configured, the
/// rule-based extractor otherwise or on any model failure.
pub struct Extractor {
    llm: Option<OllamaClient>,
    max_retries: usize,
    fallback: RuleBasedExtractor,
}

impl Extractor {
    pub fn with_llm(client: OllamaClient, max_retries: usize) -> Self {
        Self {
            llm: Some(client),
            max_retries,
            fallback: RuleBasedExtractor::new(),
        }
    }

    pub fn rule_based() -> Self {
        Self {
            llm: None,
            max_retries: 0,
            fallback: RuleBasedExtractor::new(),
        }
    }

    pub async fn extract(&self, text: &str) -> ExtractionOutcome {
        if let Some(client) = &self.llm {
            let attempt = async {
                let prompt = prompt::build_extraction_prompt(text);
                let raw = client
                    .generate_json_with_retry(&prompt, self.max_retries)
                    .await?;
                parse_ontology(&raw)
            };
            match attempt.await {
                Ok(ontology) => {
                    return ExtractionOutcome {
                        ontology,
                        used_fallback: false,
                    };
                }
                Err(err) => {
                    warn!(error = %err, "model extraction failed, using rule-based fallback");
                }
            }
        }
        ExtractionOutcome {
            ontology: self.fallback.extract(text),
            used_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rule_based_extractor_never_fails() {
        let extractor = Extractor::rule_based();
        let outcome = extractor
            .extract("Apple Inc. was founded by Steve Jobs and Steve Wozniak in Cupertino.")
            .await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.ontology.entities.len(), 4);
    }
}
