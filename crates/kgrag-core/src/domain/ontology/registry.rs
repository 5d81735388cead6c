//! Ontology registry with the built-in domain profiles

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

use super::profile::{OntologyProfile, ProfileDefinition, RuleDefinition};

/// Identifier of the generic profile
pub const GENERIC_PROFILE: &str = "generic";
/// Identifier of the legal profile
pub const LEGAL_PROFILE: &str = "legal";
/// Identifier of the customer-commerce profile
pub const CUSTOMER_COMMERCE_PROFILE: &str = "customer-commerce";

const GENERIC_LABELS: &[&str] = &[
    "Person",
    "Organization",
    "Location",
    "Event",
    "Product",
    "Concept",
];

const GENERIC_RULES: &[(&str, &str, &str)] = &[
    ("Person", "Organization", "WORKS_FOR"),
    ("Organization", "Location", "LOCATED_IN"),
    ("Person", "Location", "LOCATED_IN"),
    ("Person", "Event", "PARTICIPATED_IN"),
    ("Event", "Location", "OCCURRED_IN"),
    ("Organization", "Product", "PRODUCES"),
    ("Person", "Concept", "ASSOCIATED_WITH"),
];

const LEGAL_LABELS: &[&str] = &[
    "Person",
    "Organization",
    "Court",
    "Judge",
    "Case",
    "Law",
    "Location",
];

const LEGAL_RULES: &[(&str, &str, &str)] = &[
    ("Case", "Court", "HEARD_BY"),
    ("Judge", "Case", "PRESIDED_OVER"),
    ("Judge", "Court", "SERVES_ON"),
    ("Person", "Case", "PARTY_TO"),
    ("Organization", "Case", "PARTY_TO"),
    ("Case", "Law", "CITES"),
    ("Court", "Location", "LOCATED_IN"),
    ("Person", "Organization", "AFFILIATED_WITH"),
];

const COMMERCE_LABELS: &[&str] = &[
    "Customer",
    "Product",
    "Brand",
    "Category",
    "Feature",
    "PaymentMethod",
];

const COMMERCE_RULES: &[(&str, &str, &str)] = &[
    ("Product", "Brand", "OFFERED_BY"),
    ("Customer", "Product", "PURCHASED"),
    ("Customer", "PaymentMethod", "USES"),
    ("Customer", "Brand", "PREFERS"),
    ("Product", "Category", "BELONGS_TO"),
    ("Product", "Feature", "HAS_FEATURE"),
    ("Brand", "Category", "OPERATES_IN"),
    ("Brand", "PaymentMethod", "ACCEPTS"),
];

fn static_definition(
    id: &str,
    description: &str,
    labels: &[&str],
    rules: &[(&str, &str, &str)],
) -> ProfileDefinition {
    ProfileDefinition {
        id: id.to_string(),
        description: description.to_string(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        rules: rules
            .iter()
            .map(|(source, target, relationship)| RuleDefinition {
                source: source.to_string(),
                target: target.to_string(),
                relationship: relationship.to_string(),
            })
            .collect(),
    }
}

/// Definitions of the profiles shipped with kgrag
pub fn builtin_definitions() -> Vec<ProfileDefinition> {
    vec![
        static_definition(
            GENERIC_PROFILE,
            "People, organizations, places, events, products and concepts",
            GENERIC_LABELS,
            GENERIC_RULES,
        ),
        static_definition(
            LEGAL_PROFILE,
            "Courts, judges, cases, laws and the parties involved",
            LEGAL_LABELS,
            LEGAL_RULES,
        ),
        static_definition(
            CUSTOMER_COMMERCE_PROFILE,
            "Customer, product, brand and payment relationships",
            COMMERCE_LABELS,
            COMMERCE_RULES,
        ),
    ]
}

/// Registry of named ontology profiles.
///
/// Profiles are kept side by side and never merged; callers pick exactly one
/// for an ingestion run.
#[derive(Debug, Clone, Default)]
pub struct OntologyRegistry {
    profiles: BTreeMap<String, Arc<OntologyProfile>>,
}

impl OntologyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in profiles
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for definition in builtin_definitions() {
            // Built-in tables are validated by tests; a failure here is a programming error.
            if let Ok(profile) = OntologyProfile::from_definition(definition) {
                registry
                    .profiles
                    .insert(profile.id().to_string(), Arc::new(profile));
            }
        }
        registry
    }

    /// Register an additional profile
    pub fn register(&mut self, definition: ProfileDefinition) -> Result<Arc<OntologyProfile>> {
        let profile = OntologyProfile::from_definition(definition)?;
        if self.profiles.contains_key(profile.id()) {
            return Err(Error::InvalidProfile(format!(
                "profile '{}' is already registered",
                profile.id()
            )));
        }

        debug!(profile = %profile.id(), labels = profile.labels().len(), "Registered ontology profile");
        let profile = Arc::new(profile);
        self.profiles
            .insert(profile.id().to_string(), Arc::clone(&profile));
        Ok(profile)
    }

    /// Look up a profile by id
    pub fn get(&self, id: &str) -> Option<Arc<OntologyProfile>> {
        self.profiles.get(id).cloned()
    }

    /// Look up a profile by id, failing when it is not registered
    pub fn require(&self, id: &str) -> Result<Arc<OntologyProfile>> {
        self.get(id)
            .ok_or_else(|| Error::UnknownProfile(id.to_string()))
    }

    /// Registered profile ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// Iterate over all profiles, sorted by id
    pub fn profiles(&self) -> impl Iterator<Item = &Arc<OntologyProfile>> {
        self.profiles.values()
    }
}
