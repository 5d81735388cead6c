//! Graph store trait and the records it returns
//!
//! The trait abstracts over property-graph backends (embedded SQLite,
//! Neo4j over Bolt). Every write is an upsert keyed on natural keys, so
//! repeated ingestion never duplicates nodes or edges.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Natural key of a graph node: its label and `name` property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: String,
    pub name: String,
}

impl NodeKey {
    pub fn new(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}:{})", self.label, self.name)
    }
}

/// A full-text hit together with its one-hop neighbourhood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMatch {
    /// Matched node name
    pub entity: String,
    /// Matched node label
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Distinct names of nodes connected in either direction
    pub related_entities: Vec<String>,
    /// Distinct relationship types on those connections
    pub relationships: Vec<String>,
    /// Full-text relevance, higher is better
    pub score: f64,
}

/// One element of the retrieved context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextRecord {
    Match(ContextMatch),
    /// Sentinel produced when nothing matched the query
    NoMatches { message: String },
}

impl ContextRecord {
    /// Sentinel record for a query without hits
    pub fn no_matches(query: &str) -> Self {
        ContextRecord::NoMatches {
            message: format!("No related entities found for '{}'", query),
        }
    }

    /// Whether this is the no-match sentinel
    pub fn is_sentinel(&self) -> bool {
        matches!(self, ContextRecord::NoMatches { .. })
    }

    /// The match, if this record is one
    pub fn as_match(&self) -> Option<&ContextMatch> {
        match self {
            ContextRecord::Match(m) => Some(m),
            ContextRecord::NoMatches { .. } => None,
        }
    }
}

/// A persisted relationship, resolved to node keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRelationship {
    pub source: NodeKey,
    pub relationship: String,
    pub target: NodeKey,
}

impl std::fmt::Display for StoredRelationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.relationship, self.target)
    }
}

/// Counts describing a graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: u64,
    pub relationships: u64,
    /// Node count per label, sorted by label
    pub nodes_by_label: Vec<(String, u64)>,
    /// Edge count per relationship type, sorted by type
    pub relationships_by_type: Vec<(String, u64)>,
}

/// Session-based property-graph store
///
/// Labels passed in are already sanitized (see
/// [`sanitize_label`](super::sanitize_label)); implementations may rely on
/// them being `[A-Za-z][A-Za-z0-9_]*`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Backend name for logs and diagnostics
    fn backend(&self) -> &'static str;

    /// Liveness probe (`RETURN 1`)
    async fn ping(&self) -> Result<bool>;

    /// Bind the store to an ontology profile on first use.
    ///
    /// Fails with `ProfileMismatch` when the store is already bound to a
    /// different profile.
    async fn claim_profile(&self, profile_id: &str) -> Result<()>;

    /// Create the full-text index over `name` for the given labels if it
    /// does not exist yet. Safe to call repeatedly.
    async fn ensure_fulltext_index(&self, labels: &[String]) -> Result<()>;

    /// Create the node if absent, otherwise match the existing one
    async fn merge_node(&self, node: &NodeKey) -> Result<()>;

    /// Create the directed edge if absent. Both endpoints must exist.
    async fn merge_relationship(
        &self,
        source: &NodeKey,
        target: &NodeKey,
        relationship: &str,
    ) -> Result<()>;

    /// Full-text search on node names restricted to `labels`, expanded one
    /// hop in both directions, ordered by descending score.
    ///
    /// `query` is raw user text; each backend escapes it for its own query
    /// language. An empty result is not an error.
    async fn fulltext_search(
        &self,
        query: &str,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<ContextMatch>>;

    /// Node and edge counts
    async fn stats(&self) -> Result<GraphStats>;

    /// Up to `limit` relationships, ordered by source then target
    async fn list_relationships(&self, limit: usize) -> Result<Vec<StoredRelationship>>;
}
