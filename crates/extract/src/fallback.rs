use regex::Regex;

use crate::schema::{ExtractedEntity, ExtractedRelationship, Ontology};

const MAX_ENTITIES: usize = 16;
const MAX_RELATIONSHIPS: usize = 16;

/// How far (in bytes) a relationship cue looks for its endpoints.
const LEFT_WINDOW: usize = 100;
const RIGHT_WINDOW: usize = 120;

/// Deterministic capitalized-phrase extraction. Used whenever the model's
/// output is malformed or the model is disabled, so a chunk never fails for
/// extraction-format reasons alone.
pub struct RuleBasedExtractor {
    company: Regex,
    department: Regex,
    person: Regex,
    location: Regex,
    founded: Regex,
    works: Regex,
    manages: Regex,
    reports: Regex,
}

#[derive(Debug, Clone)]
struct Found {
    name: String,
    entity_type: &'static str,
    start: usize,
    end: usize,
}

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self {
            company: Regex::new(
                r"\b[A-Z][A-Za-z&]*(?:\s+[A-Z][A-Za-z&]*)*\s+(?:Inc|Corp|Corporation|LLC|Ltd|Company)\.?",
            )
            .expect("company pattern"),
            department: Regex::new(
                r"\b[A-Z][A-Za-z]*(?:\s+[A-Z][A-Za-z]*)*\s+(?:Department|Division|Team)\b",
            )
            .expect("department pattern"),
            person: Regex::new(r"\b[A-Z][a-z]+\s+(?:[A-Z]\.\s+)?[A-Z][a-z]+\b")
                .expect("person pattern"),
            location: Regex::new(r"\b(?:in|at|near|from)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)")
                .expect("location pattern"),
            founded: Regex::new(r"(?i)\bfounded\s+by\b").expect("founded pattern"),
            works: Regex::new(r"(?i)\bwork(?:s|ed)?\s+(?:at|for)\b").expect("works pattern"),
            manages: Regex::new(r"(?i)\bmanag(?:es|ed|ing)\b").expect("manages pattern"),
            reports: Regex::new(r"(?i)\breports?\s+to\b").expect("reports pattern"),
        }
    }

    pub fn extract(&self, text: &str) -> Ontology {
        let found = self.find_entities(text);
        let relationships = self.find_relationships(text, &found);

        let mut entities = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for f in &found {
            if !seen.insert((f.name.to_lowercase(), f.entity_type)) {
                continue;
            }
            entities.push(ExtractedEntity {
                name: f.name.clone(),
                entity_type: f.entity_type.to_string(),
                properties: Default::default(),
            });
            if entities.len() == MAX_ENTITIES {
                break;
            }
        }

        Ontology {
            entities,
            relationships,
        }
    }

    fn find_entities(&self, text: &str) -> Vec<Found> {
        let mut found: Vec<Found> = Vec::new();
        let mut consumed: Vec<(usize, usize)> = Vec::new();

        let mut take = |name: &str, entity_type: &'static str, start: usize, end: usize| {
            if consumed.iter().any(|&(s, e)| start < e && end > s) {
                return;
            }
            consumed.push((start, end));
            found.push(Found {
                name: name.trim().to_string(),
                entity_type,
                start,
                end,
            });
        };

        // Specific shapes first so "Apple Inc." is a company, not a person.
        for m in self.company.find_iter(text) {
            take(m.as_str(), "Company", m.start(), m.end());
        }
        for m in self.department.find_iter(text) {
            take(m.as_str(), "Department", m.start(), m.end());
        }
        for m in self.person.find_iter(text) {
            take(m.as_str(), "Person", m.start(), m.end());
        }
        for caps in self.location.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                take(m.as_str(), "Location", m.start(), m.end());
            }
        }

        found.sort_by_key(|f| f.start);
        found
    }

    fn find_relationships(&self, text: &str, found: &[Found]) -> Vec<ExtractedRelationship> {
        let mut rels: Vec<ExtractedRelationship> = Vec::new();
        let mut push = |source: &Found, rel_type: &str, target: &Found| {
            if source.name.eq_ignore_ascii_case(&target.name) {
                return;
            }
            let dup = rels.iter().any(|r| {
                r.source_name.eq_ignore_ascii_case(&source.name)
                    && r.target_name.eq_ignore_ascii_case(&target.name)
                    && r.rel_type.eq_ignore_ascii_case(rel_type)
            });
            if !dup && rels.len() < MAX_RELATIONSHIPS {
                rels.push(ExtractedRelationship {
                    source_name: source.name.clone(),
                    rel_type: rel_type.to_string(),
                    target_name: target.name.clone(),
                });
            }
        };

        for m in self.founded.find_iter(text) {
            let Some(source) = last_before(found, m.start(), Some("Company")) else {
                continue;
            };
            for person in all_after(found, m.end(), Some("Person")) {
                push(source, "Founder", person);
            }
        }

        for m in self.works.find_iter(text) {
            if let (Some(person), Some(org)) = (
                last_before(found, m.start(), Some("Person")),
                first_after(found, m.end(), None),
            ) {
                push(person, "EmployedBy", org);
            }
        }

        for m in self.manages.find_iter(text) {
            if let (Some(person), Some(target)) = (
                last_before(found, m.start(), Some("Person")),
                first_after(found, m.end(), None),
            ) {
                push(person, "Manages", target);
            }
        }

        for m in self.reports.find_iter(text) {
            if let (Some(person), Some(target)) = (
                last_before(found, m.start(), Some("Person")),
                first_after(found, m.end(), Some("Person")),
            ) {
                push(person, "ReportsTo", target);
            }
        }

        for location in found.iter().filter(|f| f.entity_type == "Location") {
            if let Some(source) = last_before(found, location.start, Some("Company")) {
                push(source, "LocatedIn", location);
            }
        }

        rels
    }
}

impl Default for RuleBasedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest entity ending within the window before `pos`, preferring the
/// given type but falling back to any.
fn last_before<'a>(found: &'a [Found], pos: usize, prefer: Option<&str>) -> Option<&'a Found> {
    let in_window = |f: &&Found| f.end <= pos && pos - f.end <= LEFT_WINDOW;
    if let Some(t) = prefer {
        if let Some(hit) = found
            .iter()
            .filter(in_window)
            .filter(|f| f.entity_type == t)
            .max_by_key(|f| f.end)
        {
            return Some(hit);
        }
    }
    found.iter().filter(in_window).max_by_key(|f| f.end)
}

fn first_after<'a>(found: &'a [Found], pos: usize, want: Option<&str>) -> Option<&'a Found> {
    found
        .iter()
        .filter(|f| f.start >= pos && f.start - pos <= RIGHT_WINDOW)
        .filter(|f| want.map(|t| f.entity_type == t).unwrap_or(true))
        .min_by_key(|f| f.start)
}

fn all_after<'a>(found: &'a [Found], pos: usize, want: Option<&'a str>) -> Vec<&'a Found> {
    found
        .iter()
        .filter(|f| f.start >= pos && f.start - pos <= RIGHT_WINDOW)
        .filter(|f| want.map(|t| f.entity_type == t).unwrap_or(true))
        .collect()
}
