pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify key entities (people, organizations, locations, departments, projects, events)
2. Extract relationships between entities
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"name": "EntityName", "type": "Person|Company|Location|Department|Project|Event", "properties": {{"key": "value"}}}}
  ],
  "relationships": [
    {{"sourceName": "EntityName", "type": "RelationshipType", "targetName": "OtherEntityName"}}
  ]
}}

RULES:
- Use the entity's full name exactly as it appears in the text
- Relationship types are single PascalCase words: "Founder", "EmployedBy", "Manages", "LocatedIn", etc.
- sourceName and targetName must repeat names from the entities list
- Properties are optional scalar values only
- Extract 3-10 entities and 2-8 relationships
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
