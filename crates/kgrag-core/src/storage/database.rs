//! SQLite connection pool for the embedded graph store

use std::path::{Path, PathBuf};

use anyhow::Context;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::debug;

use super::migrations::{self, SchemaStatus};

const FILE_POOL_SIZE: u32 = 5;

/// A migrated SQLite pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the database file at `path`, creating parent
    /// directories as needed, and bring its schema up to date.
    ///
    /// The file runs in WAL mode so retrieval does not block ingestion.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_SIZE)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        Self::migrated(pool, Some(path.to_path_buf())).await
    }

    /// Private in-memory database.
    ///
    /// Every `:memory:` connection is its own database, so the pool is pinned
    /// to a single connection that is never recycled.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .journal_mode(SqliteJournalMode::Memory)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::migrated(pool, None).await
    }

    async fn migrated(pool: SqlitePool, path: Option<PathBuf>) -> anyhow::Result<Self> {
        let status = migrations::migrate(&pool)
            .await
            .context("Failed to migrate graph schema")?;
        debug!(schema_version = status.applied, path = ?path, "Database ready");
        Ok(Self { pool, path })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// File backing the database; `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn schema_status(&self) -> anyhow::Result<SchemaStatus> {
        migrations::schema_status(&self.pool).await
    }
}
