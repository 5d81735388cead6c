//! Schema migrations for the embedded graph store
//!
//! Each entry in [`MIGRATIONS`] is applied once, in order, inside its own
//! transaction. The FTS5 table is not part of the schema: it is created on
//! demand by the store's `ensure_fulltext_index`.

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::{debug, info};

const CREATE_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY NOT NULL,
        description TEXT NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

const GRAPH_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS graph_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (label, name)
    );
    CREATE INDEX IF NOT EXISTS idx_graph_nodes_label ON graph_nodes(label);

    CREATE TABLE IF NOT EXISTS graph_edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
        target_id INTEGER NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
        rel_type TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (source_id, target_id, rel_type)
    );
    CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_id);
    CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);

    -- bound ontology profile and similar store-level settings
    CREATE TABLE IF NOT EXISTS graph_meta (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// A numbered schema change
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    sql: &'static str,
}

/// All migrations, oldest first
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "property graph tables",
    sql: GRAPH_TABLES,
}];

/// Latest schema version known to this build
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Applied and latest schema versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStatus {
    pub applied: i64,
    pub latest: i64,
}

impl SchemaStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.latest
    }
}

async fn applied_version(pool: &SqlitePool) -> anyhow::Result<i64> {
    sqlx::raw_sql(CREATE_VERSION_TABLE)
        .execute(pool)
        .await
        .context("Failed to create schema_version table")?;

    let (version,): (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded version
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<SchemaStatus> {
    let applied = applied_version(pool).await?;
    debug!(applied, latest = latest_version(), "Checking graph schema");

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        info!(
            version = migration.version,
            description = migration.description,
            "Applying graph schema migration"
        );

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Migration v{} failed", migration.version))?;
        sqlx::query("INSERT INTO schema_version (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    schema_status(pool).await
}

/// Current schema status without applying anything
pub async fn schema_status(pool: &SqlitePool) -> anyhow::Result<SchemaStatus> {
    Ok(SchemaStatus {
        applied: applied_version(pool).await?,
        latest: latest_version(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[test]
    fn test_versions_strictly_increase() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
        assert_eq!(latest_version(), 1);
    }

    #[tokio::test]
    async fn test_migrate_fresh_database() {
        let pool = memory_pool().await;

        let before = schema_status(&pool).await.unwrap();
        assert_eq!(before.applied, 0);
        assert!(!before.is_current());

        let after = migrate(&pool).await.unwrap();
        assert_eq!(after.applied, latest_version());
        assert!(after.is_current());
    }

    #[tokio::test]
    async fn test_migrate_twice_records_once() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_graph_tables_exist_and_enforce_uniqueness() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();

        for table in ["graph_nodes", "graph_edges", "graph_meta"] {
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "{} should start empty", table);
        }

        sqlx::query("INSERT INTO graph_nodes (label, name) VALUES ('Brand', 'Apple')")
            .execute(&pool)
            .await
            .unwrap();
        let duplicate =
            sqlx::query("INSERT INTO graph_nodes (label, name) VALUES ('Brand', 'Apple')")
                .execute(&pool)
                .await;
        assert!(duplicate.is_err());

        // same name, other label
        sqlx::query("INSERT INTO graph_nodes (label, name) VALUES ('Product', 'Apple')")
            .execute(&pool)
            .await
            .unwrap();
    }
}
