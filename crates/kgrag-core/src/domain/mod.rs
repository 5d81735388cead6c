//! Domain layer
//!
//! Contains the ontology model and the knowledge-graph pipelines.

pub mod knowledge;
pub mod ontology;
