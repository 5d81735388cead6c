//! Neo4j implementation of the GraphStore
//!
//! Talks Bolt through `neo4rs`. Upserts are Cypher `MERGE`s on
//! `(:Label {name})`; retrieval goes through a named full-text index queried
//! with `db.index.fulltext.queryNodes`.

use async_trait::async_trait;
use neo4rs::{Graph, Query, query};
use tracing::{debug, info};

use crate::config::Neo4jCredentials;
use crate::domain::knowledge::{
    ContextMatch, GraphStats, GraphStore, NodeKey, StoredRelationship,
};
use crate::error::{Error, Result};

/// Name of the full-text index over node names
pub const FULLTEXT_INDEX: &str = "entityIndex";

/// Label of the singleton node recording the bound ontology profile
const META_LABEL: &str = "KgragMeta";

/// Neo4j-backed property graph
#[derive(Clone)]
pub struct Neo4jGraphStore {
    graph: Graph,
    uri: String,
}

impl std::fmt::Debug for Neo4jGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jGraphStore").field("uri", &self.uri).finish()
    }
}

impl Neo4jGraphStore {
    /// Connect to the server described by `credentials`
    pub async fn connect(credentials: &Neo4jCredentials) -> Result<Self> {
        let graph = Graph::new(
            credentials.uri.as_str(),
            credentials.username.as_str(),
            credentials.password.as_str(),
        )
        .await
        .map_err(|e| {
            Error::StoreConnection(format!("failed to connect to {}: {}", credentials.uri, e))
        })?;

        info!(uri = %credentials.uri, "Connected to Neo4j");
        Ok(Self {
            graph,
            uri: credentials.uri.clone(),
        })
    }

    async fn run(&self, q: Query) -> Result<()> {
        self.graph.run(q).await.map_err(query_error)
    }
}

fn query_error(e: neo4rs::Error) -> Error {
    Error::StoreQuery(e.to_string())
}

fn decode_error(e: neo4rs::DeError) -> Error {
    Error::StoreQuery(format!("unexpected result shape: {}", e))
}

/// Wrap a sanitized label or relationship type in backticks for Cypher
fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Escape Lucene query syntax so user text is matched literally
pub fn escape_lucene(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
        '/',
    ];

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }

    // Bare boolean operators would still be parsed as operators
    out.split_whitespace()
        .map(|word| match word {
            "AND" | "OR" | "NOT" => word.to_lowercase(),
            _ => word.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cypher that creates the full-text index for `labels`
fn fulltext_index_statement(labels: &[String]) -> String {
    let labels = labels
        .iter()
        .map(|l| quote_identifier(l))
        .collect::<Vec<_>>()
        .join("|");
    format!(
        "CREATE FULLTEXT INDEX {} IF NOT EXISTS FOR (n:{}) ON EACH [n.name]",
        FULLTEXT_INDEX, labels
    )
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    fn backend(&self) -> &'static str {
        "neo4j"
    }

    async fn ping(&self) -> Result<bool> {
        let mut stream = self
            .graph
            .execute(query("RETURN 1 AS _ping"))
            .await
            .map_err(|e| Error::StoreConnection(e.to_string()))?;

        match stream.next().await.map_err(query_error)? {
            Some(row) => Ok(row.get::<i64>("_ping").map_err(decode_error)? == 1),
            None => Ok(false),
        }
    }

    async fn claim_profile(&self, profile_id: &str) -> Result<()> {
        let cypher = format!(
            "MERGE (m:{} {{key: 'ontology'}}) ON CREATE SET m.profile = $profile RETURN m.profile AS profile",
            quote_identifier(META_LABEL)
        );
        let mut stream = self
            .graph
            .execute(query(&cypher).param("profile", profile_id))
            .await
            .map_err(query_error)?;

        let bound = match stream.next().await.map_err(query_error)? {
            Some(row) => row.get::<String>("profile").map_err(decode_error)?,
            None => return Err(Error::StoreQuery("profile marker was not returned".into())),
        };

        if bound != profile_id {
            return Err(Error::ProfileMismatch {
                bound,
                requested: profile_id.to_string(),
            });
        }
        debug!(profile = %profile_id, "Profile claimed");
        Ok(())
    }

    async fn ensure_fulltext_index(&self, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Err(Error::InvalidInput(
                "a full-text index needs at least one label".into(),
            ));
        }
        self.run(query(&fulltext_index_statement(labels))).await?;
        debug!(index = FULLTEXT_INDEX, labels = labels.len(), "Full-text index ensured");
        Ok(())
    }

    async fn merge_node(&self, node: &NodeKey) -> Result<()> {
        let cypher = format!("MERGE (n:{} {{name: $name}})", quote_identifier(&node.label));
        self.run(query(&cypher).param("name", node.name.as_str()))
            .await?;
        debug!(node = %node, "Node merged");
        Ok(())
    }

    async fn merge_relationship(
        &self,
        source: &NodeKey,
        target: &NodeKey,
        relationship: &str,
    ) -> Result<()> {
        let cypher = format!(
            "MATCH (a:{} {{name: $source}}) MATCH (b:{} {{name: $target}}) MERGE (a)-[:{}]->(b)",
            quote_identifier(&source.label),
            quote_identifier(&target.label),
            quote_identifier(relationship),
        );
        self.run(
            query(&cypher)
                .param("source", source.name.as_str())
                .param("target", target.name.as_str()),
        )
        .await?;
        debug!(source = %source, target = %target, rel = %relationship, "Relationship merged");
        Ok(())
    }

    async fn fulltext_search(
        &self,
        text: &str,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<ContextMatch>> {
        let escaped = escape_lucene(text);
        if escaped.is_empty() || labels.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let cypher = r#"
            CALL db.index.fulltext.queryNodes($index, $query) YIELD node, score
            WITH node, score
            WHERE labels(node)[0] IN $labels
            OPTIONAL MATCH (node)-[r]-(neighbor)
            RETURN node.name AS entity,
                   labels(node)[0] AS type,
                   collect(DISTINCT neighbor.name) AS related_entities,
                   collect(DISTINCT type(r)) AS relationships,
                   score
            ORDER BY score DESC
            LIMIT $limit
        "#;

        let q = query(cypher)
            .param("index", FULLTEXT_INDEX)
            .param("query", escaped.as_str())
            .param("labels", labels.to_vec())
            .param("limit", i64::try_from(limit).unwrap_or(i64::MAX));

        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        let mut matches = Vec::new();
        while let Some(row) = stream.next().await.map_err(query_error)? {
            matches.push(ContextMatch {
                entity: row.get("entity").map_err(decode_error)?,
                entity_type: row.get("type").map_err(decode_error)?,
                related_entities: row.get("related_entities").map_err(decode_error)?,
                relationships: row.get("relationships").map_err(decode_error)?,
                score: row.get("score").map_err(decode_error)?,
            });
        }

        debug!(query = %escaped, hits = matches.len(), "Full-text search");
        Ok(matches)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let meta = quote_identifier(META_LABEL);
        let mut stats = GraphStats::default();

        let cypher = format!(
            "MATCH (n) WHERE NOT n:{} RETURN labels(n)[0] AS label, count(*) AS count ORDER BY label",
            meta
        );
        let mut stream = self.graph.execute(query(&cypher)).await.map_err(query_error)?;
        while let Some(row) = stream.next().await.map_err(query_error)? {
            let label: String = row.get("label").map_err(decode_error)?;
            let count: i64 = row.get("count").map_err(decode_error)?;
            stats.nodes += count as u64;
            stats.nodes_by_label.push((label, count as u64));
        }

        let mut stream = self
            .graph
            .execute(query(
                "MATCH ()-[r]->() RETURN type(r) AS rel_type, count(*) AS count ORDER BY rel_type",
            ))
            .await
            .map_err(query_error)?;
        while let Some(row) = stream.next().await.map_err(query_error)? {
            let rel_type: String = row.get("rel_type").map_err(decode_error)?;
            let count: i64 = row.get("count").map_err(decode_error)?;
            stats.relationships += count as u64;
            stats.relationships_by_type.push((rel_type, count as u64));
        }

        Ok(stats)
    }

    async fn list_relationships(&self, limit: usize) -> Result<Vec<StoredRelationship>> {
        let q = query(
            r#"
            MATCH (s)-[r]->(t)
            RETURN labels(s)[0] AS source_label, s.name AS source_name, type(r) AS rel_type,
                   labels(t)[0] AS target_label, t.name AS target_name
            ORDER BY source_name, source_label, target_name, target_label, rel_type
            LIMIT $limit
            "#,
        )
        .param("limit", i64::try_from(limit).unwrap_or(i64::MAX));

        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        let mut relationships = Vec::new();
        while let Some(row) = stream.next().await.map_err(query_error)? {
            let source_label: String = row.get("source_label").map_err(decode_error)?;
            let source_name: String = row.get("source_name").map_err(decode_error)?;
            let rel_type: String = row.get("rel_type").map_err(decode_error)?;
            let target_label: String = row.get("target_label").map_err(decode_error)?;
            let target_name: String = row.get("target_name").map_err(decode_error)?;
            relationships.push(StoredRelationship {
                source: NodeKey::new(source_label, source_name),
                relationship: rel_type,
                target: NodeKey::new(target_label, target_name),
            });
        }
        Ok(relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_lucene() {
        assert_eq!(escape_lucene("Apple"), "Apple");
        assert_eq!(escape_lucene("who is Alice?"), "who is Alice\\?");
        assert_eq!(escape_lucene("e-commerce (online)"), "e\\-commerce \\(online\\)");
        assert_eq!(escape_lucene("a/b:c"), "a\\/b\\:c");
        assert_eq!(escape_lucene("cats AND dogs"), "cats and dogs");
        assert_eq!(escape_lucene("   "), "");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("PaymentMethod"), "`PaymentMethod`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_fulltext_index_statement() {
        let labels = vec!["Customer".to_string(), "Product".to_string()];
        assert_eq!(
            fulltext_index_statement(&labels),
            "CREATE FULLTEXT INDEX entityIndex IF NOT EXISTS FOR (n:`Customer`|`Product`) ON EACH [n.name]"
        );
    }
}
