//! Ontology registry
//!
//! An ontology profile is a closed set of entity type labels plus a table of
//! ordered `(type, type) -> relationship` rules. Profiles are data: adding a
//! domain means adding a [`ProfileDefinition`], not new branching code.
//!
//! ```rust,ignore
//! use kgrag_core::domain::ontology::{OntologyRegistry, CUSTOMER_COMMERCE_PROFILE};
//!
//! let registry = OntologyRegistry::builtin();
//! let profile = registry.require(CUSTOMER_COMMERCE_PROFILE)?;
//! let customer = profile.resolve_label("customer").unwrap();
//! let product = profile.resolve_label("Product").unwrap();
//! assert_eq!(profile.infer_relationship(&customer, &product).unwrap().as_str(), "PURCHASED");
//! ```

mod profile;
mod registry;

pub use profile::{
    EntityType, OntologyProfile, ProfileDefinition, RelationshipLabel, RuleDefinition, title_case,
};
pub use registry::{
    CUSTOMER_COMMERCE_PROFILE, GENERIC_PROFILE, LEGAL_PROFILE, OntologyRegistry,
    builtin_definitions,
};
