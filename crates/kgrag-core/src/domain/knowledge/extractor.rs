//! Entity extraction from free text using an LLM
//!
//! The model is asked for a JSON array of `{"entity", "type"}` objects whose
//! types come from the active ontology profile. Its answer is parsed best
//! effort: anything malformed degrades to fewer (or zero) entities rather
//! than an error.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::deadline::CallBudget;
use crate::domain::ontology::OntologyProfile;
use crate::error::Result;
use crate::llm::{CompletionModel, OutputSchema};

use super::entity::{Entity, clean_entity_name};

/// Entity extractor bound to one model and one ontology profile
#[derive(Clone)]
pub struct EntityExtractor {
    model: Arc<dyn CompletionModel>,
    profile: Arc<OntologyProfile>,
    budget: CallBudget,
}

impl EntityExtractor {
    /// Create a new entity extractor
    pub fn new(model: Arc<dyn CompletionModel>, profile: Arc<OntologyProfile>) -> Self {
        Self {
            model,
            profile,
            budget: CallBudget::unbounded(),
        }
    }

    /// Apply a timeout/cancellation budget to model calls
    pub fn with_budget(mut self, budget: CallBudget) -> Self {
        self.budget = budget;
        self
    }

    /// The profile whose labels constrain extraction
    pub fn profile(&self) -> &Arc<OntologyProfile> {
        &self.profile
    }

    /// Ask the model for entities in `text` and return its normalized output.
    ///
    /// Blank text short-circuits to an empty string without a model call.
    pub async fn extract(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Skipping extraction of empty text");
            return Ok(String::new());
        }

        let prompt = self.build_prompt(text);
        let schema = self.output_schema();

        debug!(
            profile = %self.profile.id(),
            model = %self.model.model_name(),
            chars = text.chars().count(),
            "Requesting entity extraction"
        );

        let output = self
            .budget
            .run("entity extraction", self.model.invoke(&prompt, Some(&schema)))
            .await?;

        Ok(output.normalize())
    }

    /// Parse raw model output into entities of this extractor's profile
    pub fn parse(&self, raw: &str) -> Vec<Entity> {
        parse_entities(raw, &self.profile)
    }

    /// Extract then parse
    pub async fn extract_entities(&self, text: &str) -> Result<Vec<Entity>> {
        let raw = self.extract(text).await?;
        let entities = self.parse(&raw);
        info!(
            profile = %self.profile.id(),
            entities = entities.len(),
            "Entities extracted"
        );
        Ok(entities)
    }

    /// JSON schema requested from the model: an array of `{entity, type}`
    pub fn output_schema(&self) -> OutputSchema {
        OutputSchema::new(
            "entities",
            json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "entity": { "type": "string" },
                        "type": { "type": "string", "enum": self.profile.label_names() }
                    },
                    "required": ["entity", "type"],
                    "additionalProperties": false
                }
            }),
        )
    }

    fn build_prompt(&self, text: &str) -> String {
        let labels = self.profile.label_names().join(", ");
        format!(
            r#"Extract the named entities from the text below and classify each one.

Allowed types (use exactly one of these for every entity): {labels}

Text:
{text}

Return only a JSON array, with no other text, in this form:
[{{"entity": "Apple", "type": "{example}"}}]

Skip entities that do not fit any allowed type."#,
            labels = labels,
            text = text,
            example = self
                .profile
                .labels()
                .first()
                .map(|l| l.as_str())
                .unwrap_or("Entity"),
        )
    }
}

/// Parse a model answer into entities typed by `profile`.
///
/// Takes the text between the first `[` and the last `]` and reads it as a
/// JSON array. Elements that are not objects, lack a string `entity` or
/// `type`, carry a type outside the profile, or have an empty cleaned name
/// are dropped. Repeated (type, name) pairs are kept once, first occurrence
/// wins. Never fails.
pub fn parse_entities(raw: &str, profile: &OntologyProfile) -> Vec<Entity> {
    let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) else {
        debug!("Extraction output contains no JSON array");
        return Vec::new();
    };
    if end < start {
        debug!("Extraction output contains no JSON array");
        return Vec::new();
    }

    let items = match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(Value::Array(items)) => items,
        Ok(_) => return Vec::new(),
        Err(e) => {
            warn!(error = %e, "Failed to parse extraction output as JSON");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    let mut dropped = 0usize;

    for item in &items {
        let Some(entity) = parse_item(item, profile) else {
            dropped += 1;
            continue;
        };
        if seen.insert((entity.entity_type.clone(), entity.name.clone())) {
            entities.push(entity);
        }
    }

    if dropped > 0 {
        debug!(
            profile = %profile.id(),
            kept = entities.len(),
            dropped = dropped,
            "Dropped extraction items outside the ontology"
        );
    }

    entities
}

fn parse_item(item: &Value, profile: &OntologyProfile) -> Option<Entity> {
    let object = item.as_object()?;
    let name = object.get("entity")?.as_str()?;
    let raw_type = object.get("type")?.as_str()?;

    let entity_type = profile.resolve_label(raw_type)?;
    let name = clean_entity_name(name);
    if name.is_empty() {
        return None;
    }

    Some(Entity::new(name, entity_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ontology::{CUSTOMER_COMMERCE_PROFILE, OntologyRegistry};
    use crate::llm::ModelOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Model double that replays one answer and records prompts
    struct ScriptedModel {
        answer: ModelOutput,
        prompts: Mutex<Vec<(String, Option<OutputSchema>)>>,
    }

    impl ScriptedModel {
        fn new(answer: impl Into<ModelOutput>) -> Self {
            Self {
                answer: answer.into(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn invoke(&self, prompt: &str, schema: Option<&OutputSchema>) -> Result<ModelOutput> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), schema.cloned()));
            Ok(self.answer.clone())
        }
    }

    fn commerce() -> Arc<OntologyProfile> {
        OntologyRegistry::builtin()
            .require(CUSTOMER_COMMERCE_PROFILE)
            .unwrap()
    }

    fn names(entities: &[Entity]) -> Vec<(String, String)> {
        entities
            .iter()
            .map(|e| (e.name.clone(), e.entity_type.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_text_skips_model() {
        let model = Arc::new(ScriptedModel::new("[]"));
        let extractor = EntityExtractor::new(model.clone(), commerce());

        assert_eq!(extractor.extract("   \n\t ").await.unwrap(), "");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_extract_sends_prompt_and_schema() {
        let model = Arc::new(ScriptedModel::new(
            "  [{\"entity\": \"Apple\", \"type\": \"Brand\"}]\n",
        ));
        let extractor = EntityExtractor::new(model.clone(), commerce());

        let raw = extractor.extract("Apple makes the iPhone.").await.unwrap();
        assert_eq!(raw, "[{\"entity\": \"Apple\", \"type\": \"Brand\"}]");

        let prompts = model.prompts.lock().unwrap();
        let (prompt, schema) = &prompts[0];
        assert!(prompt.contains("Apple makes the iPhone."));
        assert!(prompt.contains("PaymentMethod"));

        let schema = schema.as_ref().unwrap();
        let allowed = &schema.schema["items"]["properties"]["type"]["enum"];
        assert_eq!(allowed.as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_extract_concatenates_parts() {
        let parts: ModelOutput = serde_json::from_str(
            r#"[{"type": "text", "text": "[{\"entity\": \"Alice\", "}, "\"type\": \"Customer\"}] "]"#,
        )
        .unwrap();
        let extractor = EntityExtractor::new(Arc::new(ScriptedModel::new(parts)), commerce());

        let entities = extractor.extract_entities("Alice shops online").await.unwrap();
        assert_eq!(names(&entities), vec![("Alice".into(), "Customer".into())]);
    }

    #[test]
    fn test_parse_surrounding_prose_and_fences() {
        let raw = "Sure! Here you go:\n```json\n[{\"entity\": \"iPhone\", \"type\": \"Product\"}, {\"entity\": \"PayPal\", \"type\": \"PaymentMethod\"}]\n```";
        let entities = parse_entities(raw, &commerce());
        assert_eq!(
            names(&entities),
            vec![
                ("iPhone".into(), "Product".into()),
                ("PayPal".into(), "PaymentMethod".into())
            ]
        );
    }

    #[test]
    fn test_parse_degrades_gracefully() {
        let profile = commerce();
        assert!(parse_entities("", &profile).is_empty());
        assert!(parse_entities("no json here", &profile).is_empty());
        assert!(parse_entities("] backwards [", &profile).is_empty());
        assert!(parse_entities("[not json]", &profile).is_empty());
        assert!(parse_entities("[{\"entity\": \"Apple\"", &profile).is_empty());
        assert!(parse_entities("{\"entity\": \"Apple\", \"type\": \"Brand\"}", &profile).is_empty());
    }

    #[test]
    fn test_parse_drops_invalid_items() {
        let raw = r#"[
            "Apple",
            42,
            {"entity": "Apple"},
            {"type": "Brand"},
            {"entity": 7, "type": "Brand"},
            {"entity": "Paris", "type": "Location"},
            {"entity": "  - ", "type": "Brand"},
            {"entity": "1. Amazon", "type": "brand"}
        ]"#;
        let entities = parse_entities(raw, &commerce());
        assert_eq!(names(&entities), vec![("Amazon".into(), "Brand".into())]);
    }

    #[test]
    fn test_parse_title_cases_types() {
        let raw = r#"[{"entity": "Bob", "type": " customer "}, {"entity": "Card", "type": "PAYMENTMETHOD"}]"#;
        let entities = parse_entities(raw, &commerce());
        // "Paymentmethod" is not a label, so only Bob survives
        assert_eq!(names(&entities), vec![("Bob".into(), "Customer".into())]);
    }

    #[test]
    fn test_parse_removes_exact_duplicates() {
        let raw = r#"[
            {"entity": "Apple", "type": "Brand"},
            {"entity": "Apple", "type": "Brand"},
            {"entity": "Apple", "type": "Product"}
        ]"#;
        let entities = parse_entities(raw, &commerce());
        assert_eq!(
            names(&entities),
            vec![("Apple".into(), "Brand".into()), ("Apple".into(), "Product".into())]
        );
    }
}
