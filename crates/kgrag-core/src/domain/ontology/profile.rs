//! Ontology profiles: a closed label set plus a directional rule table

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::knowledge::sanitize_label;
use crate::error::{Error, Result};

/// An entity type label that belongs to an ontology profile.
///
/// Values are only handed out by [`OntologyProfile::resolve_label`] and
/// [`OntologyProfile::labels`], so holding one proves the label is part of
/// a closed label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityType(Arc<str>);

impl EntityType {
    fn new(label: &str) -> Self {
        Self(Arc::from(label))
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verb-phrase label of an inferred relationship (e.g. `PURCHASED`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipLabel(String);

impl RelationshipLabel {
    /// Create a relationship label
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializable description of a profile, as written in config files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// One `(source, target) -> relationship` rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDefinition {
    pub source: String,
    pub target: String,
    pub relationship: String,
}

/// An immutable ontology profile.
///
/// The rule table is keyed by ordered label pairs, so
/// `(Customer, Product)` and `(Product, Customer)` are independent entries.
#[derive(Debug, Clone)]
pub struct OntologyProfile {
    id: String,
    description: String,
    labels: Vec<EntityType>,
    rules: HashMap<(EntityType, EntityType), RelationshipLabel>,
}

impl OntologyProfile {
    /// Build and validate a profile from its definition
    pub fn from_definition(definition: ProfileDefinition) -> Result<Self> {
        let id = definition.id.trim().to_string();
        if id.is_empty() {
            return Err(Error::InvalidProfile("profile id must not be empty".into()));
        }
        if definition.labels.is_empty() {
            return Err(Error::InvalidProfile(format!(
                "profile '{}' declares no labels",
                id
            )));
        }

        let mut seen = HashSet::new();
        let mut store_labels = HashMap::new();
        let mut labels = Vec::with_capacity(definition.labels.len());
        for raw in &definition.labels {
            let label = raw.trim();
            if label.is_empty() {
                return Err(Error::InvalidProfile(format!(
                    "profile '{}' declares an empty label",
                    id
                )));
            }
            if !seen.insert(label.to_string()) {
                return Err(Error::InvalidProfile(format!(
                    "profile '{}' declares label '{}' twice",
                    id, label
                )));
            }
            claim_store_label(&mut store_labels, &id, "labels", label)?;
            labels.push(EntityType::new(label));
        }

        let lookup = |name: &str| labels.iter().find(|l| l.as_str() == name.trim()).cloned();

        let mut store_relationships = HashMap::new();
        let mut rules = HashMap::with_capacity(definition.rules.len());
        for rule in &definition.rules {
            let source = lookup(&rule.source).ok_or_else(|| {
                Error::InvalidProfile(format!(
                    "rule source '{}' is not a label of profile '{}'",
                    rule.source, id
                ))
            })?;
            let target = lookup(&rule.target).ok_or_else(|| {
                Error::InvalidProfile(format!(
                    "rule target '{}' is not a label of profile '{}'",
                    rule.target, id
                ))
            })?;
            let relationship = rule.relationship.trim();
            if relationship.is_empty() {
                return Err(Error::InvalidProfile(format!(
                    "rule {} -> {} in profile '{}' has no relationship label",
                    source, target, id
                )));
            }
            claim_store_label(&mut store_relationships, &id, "relationships", relationship)?;
            rules.insert((source, target), RelationshipLabel::new(relationship));
        }

        Ok(Self {
            id,
            description: definition.description,
            labels,
            rules,
        })
    }

    /// Profile identifier (e.g. `customer-commerce`)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The closed label set, in declaration order
    pub fn labels(&self) -> &[EntityType] {
        &self.labels
    }

    /// Label strings, in declaration order
    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(EntityType::as_str).collect()
    }

    /// Relationship implied by an entity of type `source` co-occurring with
    /// an entity of type `target`. Unmapped pairs have no relationship.
    pub fn infer_relationship(
        &self,
        source: &EntityType,
        target: &EntityType,
    ) -> Option<&RelationshipLabel> {
        self.rules.get(&(source.clone(), target.clone()))
    }

    /// All rules, sorted by source then target label
    pub fn rules(&self) -> Vec<(&EntityType, &EntityType, &RelationshipLabel)> {
        let mut rules: Vec<_> = self
            .rules
            .iter()
            .map(|((source, target), label)| (source, target, label))
            .collect();
        rules.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        rules
    }

    /// Map a model-provided type string onto this profile's label set.
    ///
    /// Tries the trimmed string first, then its title-cased form.
    pub fn resolve_label(&self, raw: &str) -> Option<EntityType> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        self.find_label(trimmed)
            .or_else(|| self.find_label(&title_case(trimmed)))
    }

    /// Whether a label string belongs to this profile
    pub fn contains_label(&self, label: &str) -> bool {
        self.find_label(label).is_some()
    }

    /// Convert back to a serializable definition
    pub fn to_definition(&self) -> ProfileDefinition {
        ProfileDefinition {
            id: self.id.clone(),
            description: self.description.clone(),
            labels: self.labels.iter().map(|l| l.as_str().to_string()).collect(),
            rules: self
                .rules()
                .into_iter()
                .map(|(source, target, label)| RuleDefinition {
                    source: source.as_str().to_string(),
                    target: target.as_str().to_string(),
                    relationship: label.as_str().to_string(),
                })
                .collect(),
        }
    }

    fn find_label(&self, label: &str) -> Option<EntityType> {
        self.labels.iter().find(|l| l.as_str() == label).cloned()
    }
}

/// Record the store label of `raw`, rejecting a different name that
/// sanitizes to the same one
fn claim_store_label(
    taken: &mut HashMap<String, String>,
    profile_id: &str,
    kind: &str,
    raw: &str,
) -> Result<()> {
    let sanitized = sanitize_label(raw);
    match taken.get(&sanitized) {
        Some(existing) if existing != raw => Err(Error::InvalidProfile(format!(
            "{} '{}' and '{}' of profile '{}' both map to store label '{}'",
            kind, existing, raw, profile_id, sanitized
        ))),
        Some(_) => Ok(()),
        None => {
            taken.insert(sanitized, raw.to_string());
            Ok(())
        }
    }
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
