//! Knowledge graph construction and GraphRAG retrieval
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Construction Pipeline                        │
//! │   SourceText → EntityExtractor → GraphWriter → GraphStore        │
//! └─────────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    GraphRAG Answer Pipeline                      │
//! │  Question → SubgraphRetriever → render_context → Synthesizer     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both pipelines share one [`GraphStore`] and one ontology profile. Writes
//! are upserts, so ingestion can be repeated while queries are served.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kgrag_core::domain::knowledge::{EntityExtractor, GraphWriter, SubgraphRetriever};
//!
//! let extractor = EntityExtractor::new(model.clone(), profile.clone());
//! let entities = extractor.extract_entities("Alice bought an iPhone from Apple").await?;
//!
//! let writer = GraphWriter::new(store.clone(), profile.clone());
//! writer.persist(&entities).await?;
//!
//! let retriever = SubgraphRetriever::new(store, profile);
//! let context = retriever.retrieve_context("Apple", 15).await?;
//! ```

mod entity;
mod extractor;
mod repository;
mod retriever;
mod service;
mod source;
mod synthesizer;
mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use entity::{Entity, clean_entity_name};
pub use extractor::{EntityExtractor, parse_entities};
pub use repository::{
    ContextMatch, ContextRecord, GraphStats, GraphStore, NodeKey, StoredRelationship,
};
pub use retriever::{SubgraphRetriever, render_context};
pub use service::{IngestReport, IngestionService, TopicReport, TopicStatus};
pub use source::SourceText;
pub use synthesizer::AnswerSynthesizer;
pub use writer::{GraphWriter, PersistSummary, sanitize_label};
