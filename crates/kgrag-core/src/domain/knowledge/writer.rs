//! Persisting extracted entities as graph nodes and inferred edges

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::deadline::CallBudget;
use crate::domain::ontology::OntologyProfile;
use crate::error::Result;

use super::entity::Entity;
use super::repository::{GraphStore, NodeKey};

/// Number of upserts issued by one [`GraphWriter::persist`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub nodes: usize,
    pub relationships: usize,
}

/// Make a string safe to use as a node label or relationship type.
///
/// Whitespace runs and any other character outside `[A-Za-z0-9_]` become
/// `_`, repeated `_` collapse, and leading/trailing `_` are trimmed. An empty
/// result becomes `Entity`; a result not starting with a letter gets an `L_`
/// prefix. The first character is upper-cased.
pub fn sanitize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let mapped = if c.is_ascii_alphanumeric() { c } else { '_' };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return "Entity".to_string();
    }

    let mut label = if trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
        trimmed.to_string()
    } else {
        format!("L_{}", trimmed)
    };

    // ASCII-only at this point, so byte 0 is a whole character
    label[..1].make_ascii_uppercase();
    label
}

/// Writes entities and their rule-inferred relationships to a graph store
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
    profile: Arc<OntologyProfile>,
    budget: CallBudget,
    claimed: OnceCell<()>,
}

impl GraphWriter {
    /// Create a writer for `profile` on `store`
    pub fn new(store: Arc<dyn GraphStore>, profile: Arc<OntologyProfile>) -> Self {
        Self {
            store,
            profile,
            budget: CallBudget::unbounded(),
            claimed: OnceCell::new(),
        }
    }

    /// Apply a timeout/cancellation budget to store calls
    pub fn with_budget(mut self, budget: CallBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Upsert every entity as a node, then every inferred edge between them.
    ///
    /// All node upserts finish before the first edge upsert. Any store error
    /// aborts the remaining writes. Upserts are idempotent, so persisting the
    /// same batch twice leaves the graph unchanged.
    pub async fn persist(&self, entities: &[Entity]) -> Result<PersistSummary> {
        if entities.is_empty() {
            debug!("Nothing to persist");
            return Ok(PersistSummary::default());
        }

        self.claimed
            .get_or_try_init(|| async {
                self.budget
                    .run("claim profile", self.store.claim_profile(self.profile.id()))
                    .await
            })
            .await?;

        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(entities.len());
        for entity in entities {
            let key = NodeKey::new(sanitize_label(entity.entity_type.as_str()), &entity.name);
            if seen.insert(key.clone()) {
                batch.push((entity, key));
            }
        }

        for (_, key) in &batch {
            debug!(node = %key, "Merging node");
            self.budget
                .run("merge node", self.store.merge_node(key))
                .await?;
        }

        let mut relationships = 0;
        for (i, (source, source_key)) in batch.iter().enumerate() {
            for (j, (target, target_key)) in batch.iter().enumerate() {
                if i == j {
                    continue;
                }
                let Some(rel) = self
                    .profile
                    .infer_relationship(&source.entity_type, &target.entity_type)
                else {
                    continue;
                };

                let rel_type = sanitize_label(rel.as_str());
                debug!(source = %source_key, target = %target_key, rel = %rel_type, "Merging relationship");
                self.budget
                    .run(
                        "merge relationship",
                        self.store.merge_relationship(source_key, target_key, &rel_type),
                    )
                    .await?;
                relationships += 1;
            }
        }

        let summary = PersistSummary {
            nodes: batch.len(),
            relationships,
        };
        info!(
            backend = self.store.backend(),
            profile = %self.profile.id(),
            nodes = summary.nodes,
            relationships = summary.relationships,
            "Persisted entities"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_label_examples() {
        assert_eq!(sanitize_label("Customer"), "Customer");
        assert_eq!(sanitize_label("payment method"), "Payment_method");
        assert_eq!(sanitize_label("  Payment   Method "), "Payment_Method");
        assert_eq!(sanitize_label("e-commerce/retail"), "E_commerce_retail");
        assert_eq!(sanitize_label("OFFERED_BY"), "OFFERED_BY");
        assert_eq!(sanitize_label("__a__b__"), "A_b");
    }

    #[test]
    fn test_sanitize_label_edge_cases() {
        assert_eq!(sanitize_label(""), "Entity");
        assert_eq!(sanitize_label("   "), "Entity");
        assert_eq!(sanitize_label("!!!"), "Entity");
        assert_eq!(sanitize_label("123abc"), "L_123abc");
        assert_eq!(sanitize_label("9"), "L_9");
        assert_eq!(sanitize_label("café"), "Caf");
    }

    #[test]
    fn test_sanitize_label_output_shape() {
        let inputs = [
            "", "a", "A b", "--x--", "0", "Ünïcode", "tab\tsep", "a__b", "`drop`", "x\ny",
        ];
        for input in inputs {
            let label = sanitize_label(input);
            assert!(!label.is_empty());
            assert!(label.starts_with(|c: char| c.is_ascii_uppercase()), "{label}");
            assert!(label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'), "{label}");
            assert!(!label.contains("__"), "{label}");
            assert!(!label.ends_with('_'), "{label}");
            assert_eq!(sanitize_label(&label), label, "sanitizing twice changed {label}");
        }
    }
}
