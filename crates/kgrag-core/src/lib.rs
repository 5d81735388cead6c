//! kgrag Core Library
//!
//! Knowledge-graph construction and graph-augmented retrieval (GraphRAG):
//! - Ontology profiles (closed label sets with directional relationship rules)
//! - LLM entity extraction with best-effort parsing
//! - Idempotent graph persistence (SQLite or Neo4j)
//! - Full-text subgraph retrieval and answer synthesis
//! - Configuration, deadlines and error taxonomy shared by the CLI

pub mod application;
pub mod config;
pub mod deadline;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::application::KnowledgeGraph;
    pub use crate::config::Config;
    pub use crate::deadline::CallBudget;
    pub use crate::domain::knowledge::{ContextRecord, Entity, GraphStore};
    pub use crate::domain::ontology::{OntologyProfile, OntologyRegistry};
    pub use crate::error::{Error, Result};
}
