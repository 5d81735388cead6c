//! SQLite implementation of the GraphStore
//!
//! Nodes and edges live in plain tables with unique natural keys, so every
//! write is an `INSERT .. ON CONFLICT DO NOTHING`. Full-text search uses an
//! external-content FTS5 table over node names ranked with BM25.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::domain::knowledge::{
    ContextMatch, GraphStats, GraphStore, NodeKey, StoredRelationship,
};
use crate::error::{Error, Result};
use crate::storage::Database;

/// Key in `graph_meta` holding the bound ontology profile
const PROFILE_META_KEY: &str = "ontology_profile";

const CREATE_FULLTEXT_INDEX: &str = r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS graph_nodes_fts USING fts5(
        name,
        content='graph_nodes',
        content_rowid='id',
        tokenize='unicode61 remove_diacritics 2'
    );

    CREATE TRIGGER IF NOT EXISTS graph_nodes_fts_ai AFTER INSERT ON graph_nodes BEGIN
        INSERT INTO graph_nodes_fts(rowid, name) VALUES (NEW.id, NEW.name);
    END;

    CREATE TRIGGER IF NOT EXISTS graph_nodes_fts_ad AFTER DELETE ON graph_nodes BEGIN
        INSERT INTO graph_nodes_fts(graph_nodes_fts, rowid, name)
        VALUES ('delete', OLD.id, OLD.name);
    END;

    CREATE TRIGGER IF NOT EXISTS graph_nodes_fts_au AFTER UPDATE ON graph_nodes BEGIN
        INSERT INTO graph_nodes_fts(graph_nodes_fts, rowid, name)
        VALUES ('delete', OLD.id, OLD.name);
        INSERT INTO graph_nodes_fts(rowid, name) VALUES (NEW.id, NEW.name);
    END;
"#;

/// SQLite-backed property graph
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Wrap an already migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating and migrating if needed) the database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let db = Database::open(path)
            .await
            .map_err(|e| Error::StoreConnection(format!("{:#}", e)))?;
        info!(path = %path.display(), "Opened SQLite graph store");
        Ok(Self::new(db.pool().clone()))
    }

    /// Fresh in-memory graph (useful for testing)
    pub async fn in_memory() -> Result<Self> {
        let db = Database::in_memory()
            .await
            .map_err(|e| Error::StoreConnection(format!("{:#}", e)))?;
        Ok(Self::new(db.pool().clone()))
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fulltext_table_exists(&self) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'graph_nodes_fts'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn node_exists(&self, node: &NodeKey) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM graph_nodes WHERE label = ? AND name = ?")
                .bind(&node.label)
                .bind(&node.name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn neighbourhood(&self, node_id: i64) -> Result<(Vec<String>, Vec<String>)> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT neighbor, rel_type FROM (
                SELECT m.name AS neighbor, e.rel_type AS rel_type
                FROM graph_edges e JOIN graph_nodes m ON m.id = e.target_id
                WHERE e.source_id = ?
                UNION ALL
                SELECT m.name AS neighbor, e.rel_type AS rel_type
                FROM graph_edges e JOIN graph_nodes m ON m.id = e.source_id
                WHERE e.target_id = ?
            )
            ORDER BY neighbor, rel_type
            "#,
        )
        .bind(node_id)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;

        let mut neighbors: Vec<String> = Vec::new();
        let mut relationships: Vec<String> = Vec::new();
        for (neighbor, rel_type) in rows {
            if !neighbors.contains(&neighbor) {
                neighbors.push(neighbor);
            }
            if !relationships.contains(&rel_type) {
                relationships.push(rel_type);
            }
        }
        Ok((neighbors, relationships))
    }
}

/// Shortest token searched as a prefix; shorter ones must match a whole word
const MIN_PREFIX_CHARS: usize = 3;

/// Build an FTS5 query: every alphanumeric token as a quoted term, OR-joined.
/// Tokens of at least [`MIN_PREFIX_CHARS`] characters also match as prefixes.
///
/// Returns `None` when the text has no searchable token.
pub fn fts5_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t.chars().count() >= MIN_PREFIX_CHARS {
                format!("\"{}\"*", t)
            } else {
                format!("\"{}\"", t)
            }
        })
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<bool> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1 AS _ping")
            .fetch_one(&self.pool)
            .await?;
        Ok(one == 1)
    }

    async fn claim_profile(&self, profile_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO graph_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
        )
        .bind(PROFILE_META_KEY)
        .bind(profile_id)
        .execute(&self.pool)
        .await?;

        let (bound,): (String,) = sqlx::query_as("SELECT value FROM graph_meta WHERE key = ?")
            .bind(PROFILE_META_KEY)
            .fetch_one(&self.pool)
            .await?;

        if bound != profile_id {
            return Err(Error::ProfileMismatch {
                bound,
                requested: profile_id.to_string(),
            });
        }
        debug!(profile = %profile_id, "Profile claimed");
        Ok(())
    }

    async fn ensure_fulltext_index(&self, _labels: &[String]) -> Result<()> {
        // Label filtering happens at query time; one index covers every label
        if self.fulltext_table_exists().await? {
            return Ok(());
        }

        sqlx::raw_sql(CREATE_FULLTEXT_INDEX)
            .execute(&self.pool)
            .await?;
        // Index nodes written before the table existed
        sqlx::query("INSERT INTO graph_nodes_fts(graph_nodes_fts) VALUES ('rebuild')")
            .execute(&self.pool)
            .await?;

        info!("Created full-text index graph_nodes_fts");
        Ok(())
    }

    async fn merge_node(&self, node: &NodeKey) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO graph_nodes (label, name) VALUES (?, ?) ON CONFLICT(label, name) DO NOTHING",
        )
        .bind(&node.label)
        .bind(&node.name)
        .execute(&self.pool)
        .await?;

        debug!(node = %node, created = result.rows_affected() > 0, "Node merged");
        Ok(())
    }

    async fn merge_relationship(
        &self,
        source: &NodeKey,
        target: &NodeKey,
        relationship: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO graph_edges (source_id, target_id, rel_type)
            SELECT s.id, t.id, ?
            FROM graph_nodes s, graph_nodes t
            WHERE s.label = ? AND s.name = ? AND t.label = ? AND t.name = ?
            ON CONFLICT(source_id, target_id, rel_type) DO NOTHING
            "#,
        )
        .bind(relationship)
        .bind(&source.label)
        .bind(&source.name)
        .bind(&target.label)
        .bind(&target.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            for endpoint in [source, target] {
                if !self.node_exists(endpoint).await? {
                    return Err(Error::StoreQuery(format!(
                        "cannot create {} edge: node {} does not exist",
                        relationship, endpoint
                    )));
                }
            }
        }

        debug!(
            source = %source,
            target = %target,
            rel = %relationship,
            created = result.rows_affected() > 0,
            "Relationship merged"
        );
        Ok(())
    }

    async fn fulltext_search(
        &self,
        query: &str,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<ContextMatch>> {
        let Some(fts_query) = fts5_query(query) else {
            return Ok(Vec::new());
        };
        if labels.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; labels.len()].join(", ");
        let sql = format!(
            r#"
            SELECT n.id, n.name, n.label, -bm25(graph_nodes_fts) AS score
            FROM graph_nodes_fts
            JOIN graph_nodes n ON n.id = graph_nodes_fts.rowid
            WHERE graph_nodes_fts MATCH ? AND n.label IN ({})
            ORDER BY score DESC, n.name
            LIMIT ?
            "#,
            placeholders
        );

        let mut q = sqlx::query_as::<_, HitRow>(&sql).bind(&fts_query);
        for label in labels {
            q = q.bind(label);
        }
        let hits = q
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        debug!(query = %fts_query, hits = hits.len(), "Full-text search");

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            let (related_entities, relationships) = self.neighbourhood(hit.id).await?;
            matches.push(ContextMatch {
                entity: hit.name,
                entity_type: hit.label,
                related_entities,
                relationships,
                score: hit.score,
            });
        }
        Ok(matches)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let (nodes,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_nodes")
            .fetch_one(&self.pool)
            .await?;
        let (relationships,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_edges")
            .fetch_one(&self.pool)
            .await?;

        let by_label: Vec<(String, i64)> = sqlx::query_as(
            "SELECT label, COUNT(*) FROM graph_nodes GROUP BY label ORDER BY label",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT rel_type, COUNT(*) FROM graph_edges GROUP BY rel_type ORDER BY rel_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(GraphStats {
            nodes: nodes as u64,
            relationships: relationships as u64,
            nodes_by_label: by_label.into_iter().map(|(l, c)| (l, c as u64)).collect(),
            relationships_by_type: by_type.into_iter().map(|(t, c)| (t, c as u64)).collect(),
        })
    }

    async fn list_relationships(&self, limit: usize) -> Result<Vec<StoredRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            r#"
            SELECT s.label AS source_label, s.name AS source_name, e.rel_type,
                   t.label AS target_label, t.name AS target_name
            FROM graph_edges e
            JOIN graph_nodes s ON s.id = e.source_id
            JOIN graph_nodes t ON t.id = e.target_id
            ORDER BY s.name, s.label, t.name, t.label, e.rel_type
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RelationshipRow::into_relationship).collect())
    }
}

#[derive(Debug, FromRow)]
struct HitRow {
    id: i64,
    name: String,
    label: String,
    score: f64,
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    source_label: String,
    source_name: String,
    rel_type: String,
    target_label: String,
    target_name: String,
}

impl RelationshipRow {
    fn into_relationship(self) -> StoredRelationship {
        StoredRelationship {
            source: NodeKey::new(self.source_label, self.source_name),
            relationship: self.rel_type,
            target: NodeKey::new(self.target_label, self.target_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn seeded_store() -> SqliteGraphStore {
        let store = SqliteGraphStore::in_memory().await.unwrap();
        let alice = NodeKey::new("Customer", "Alice");
        let iphone = NodeKey::new("Product", "iPhone");
        let apple = NodeKey::new("Brand", "Apple");
        for node in [&alice, &iphone, &apple] {
            store.merge_node(node).await.unwrap();
        }
        store.merge_relationship(&alice, &iphone, "PURCHASED").await.unwrap();
        store.merge_relationship(&iphone, &apple, "OFFERED_BY").await.unwrap();
        store.merge_relationship(&alice, &apple, "PREFERS").await.unwrap();
        store
    }

    #[test]
    fn test_fts5_query() {
        assert_eq!(fts5_query("Apple"), Some("\"Apple\"*".to_string()));
        assert_eq!(
            fts5_query("who bought an iPhone?"),
            Some("\"who\"* OR \"bought\"* OR \"an\" OR \"iPhone\"*".to_string())
        );
        assert_eq!(fts5_query("\"AND\" OR (NOT)"), Some("\"AND\"* OR \"OR\" OR \"NOT\"*".to_string()));
        assert_eq!(fts5_query("  ?!*  "), None);
        assert_eq!(fts5_query(""), None);
    }

    #[tokio::test]
    async fn test_ping() {
        let store = SqliteGraphStore::in_memory().await.unwrap();
        assert!(store.ping().await.unwrap());
        assert_eq!(store.backend(), "sqlite");
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let store = seeded_store().await;
        let before = store.stats().await.unwrap();

        let alice = NodeKey::new("Customer", "Alice");
        let iphone = NodeKey::new("Product", "iPhone");
        store.merge_node(&alice).await.unwrap();
        store.merge_relationship(&alice, &iphone, "PURCHASED").await.unwrap();

        let after = store.stats().await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.nodes, 3);
        assert_eq!(after.relationships, 3);
    }

    #[tokio::test]
    async fn test_edge_requires_endpoints() {
        let store = SqliteGraphStore::in_memory().await.unwrap();
        let alice = NodeKey::new("Customer", "Alice");
        store.merge_node(&alice).await.unwrap();

        let err = store
            .merge_relationship(&alice, &NodeKey::new("Product", "Ghost"), "PURCHASED")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreQuery(_)));
    }

    #[tokio::test]
    async fn test_claim_profile() {
        let store = SqliteGraphStore::in_memory().await.unwrap();
        store.claim_profile("customer-commerce").await.unwrap();
        store.claim_profile("customer-commerce").await.unwrap();

        let err = store.claim_profile("legal").await.unwrap_err();
        match err {
            Error::ProfileMismatch { bound, requested } => {
                assert_eq!(bound, "customer-commerce");
                assert_eq!(requested, "legal");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_index_covers_nodes_written_before_and_after() {
        let store = seeded_store().await;
        let all = labels(&["Customer", "Product", "Brand"]);

        store.ensure_fulltext_index(&all).await.unwrap();
        store.ensure_fulltext_index(&all).await.unwrap();
        store.merge_node(&NodeKey::new("Brand", "PayPal")).await.unwrap();

        let apple = store.fulltext_search("apple", &all, 10).await.unwrap();
        assert_eq!(apple.len(), 1);
        let paypal = store.fulltext_search("PayPal", &all, 10).await.unwrap();
        assert_eq!(paypal.len(), 1);
        assert!(paypal[0].related_entities.is_empty());
    }

    #[tokio::test]
    async fn test_search_expands_one_hop_both_directions() {
        let store = seeded_store().await;
        let all = labels(&["Customer", "Product", "Brand"]);
        store.ensure_fulltext_index(&all).await.unwrap();

        let hits = store.fulltext_search("iPhone", &all, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.entity, "iPhone");
        assert_eq!(hit.entity_type, "Product");
        assert_eq!(hit.related_entities, vec!["Alice", "Apple"]);
        assert_eq!(hit.relationships, vec!["PURCHASED", "OFFERED_BY"]);
        assert!(hit.score > 0.0);
    }

    #[tokio::test]
    async fn test_search_restricted_to_labels() {
        let store = seeded_store().await;
        store.merge_node(&NodeKey::new("Court", "Apple Court")).await.unwrap();
        let commerce = labels(&["Customer", "Product", "Brand"]);
        store.ensure_fulltext_index(&commerce).await.unwrap();

        let hits = store.fulltext_search("Apple", &commerce, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_type, "Brand");

        assert!(store.fulltext_search("Apple", &[], 10).await.unwrap().is_empty());
        assert!(store.fulltext_search("Apple", &commerce, 0).await.unwrap().is_empty());
        assert!(store.fulltext_search("?!", &commerce, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_question_words_do_not_prefix_match() {
        let store = SqliteGraphStore::in_memory().await.unwrap();
        for name in ["Android", "Island Records", "Itunes"] {
            store.merge_node(&NodeKey::new("Product", name)).await.unwrap();
        }
        let all = labels(&["Product"]);
        store.ensure_fulltext_index(&all).await.unwrap();

        let hits = store.fulltext_search("is it an Android?", &all, 10).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.entity.as_str()).collect();
        assert_eq!(names, vec!["Android"]);
    }

    #[tokio::test]
    async fn test_search_limit_and_order() {
        let store = SqliteGraphStore::in_memory().await.unwrap();
        for name in ["Apple Pay", "Apple Watch", "Apple", "Apple Music"] {
            store.merge_node(&NodeKey::new("Product", name)).await.unwrap();
        }
        let all = labels(&["Product"]);
        store.ensure_fulltext_index(&all).await.unwrap();

        let hits = store.fulltext_search("apple", &all, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_list_relationships_and_stats() {
        let store = seeded_store().await;

        let rels = store.list_relationships(10).await.unwrap();
        assert_eq!(rels.len(), 3);
        assert_eq!(rels[0].source, NodeKey::new("Customer", "Alice"));
        assert_eq!(rels[0].target, NodeKey::new("Brand", "Apple"));
        assert_eq!(rels[0].relationship, "PREFERS");
        assert_eq!(store.list_relationships(1).await.unwrap().len(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats.nodes_by_label,
            vec![
                ("Brand".to_string(), 1),
                ("Customer".to_string(), 1),
                ("Product".to_string(), 1)
            ]
        );
        assert_eq!(stats.relationships_by_type.len(), 3);
    }
}
