//! Graph store backends
//!
//! - `sqlite`: embedded store used for local runs and tests
//! - `neo4j`: Bolt connection to a Neo4j server

mod neo4j;
mod sqlite;

use std::sync::Arc;

use crate::config::{GraphBackend, GraphConfig};
use crate::domain::knowledge::GraphStore;
use crate::error::{Error, Result};

pub use neo4j::{FULLTEXT_INDEX, Neo4jGraphStore, escape_lucene};
pub use sqlite::{SqliteGraphStore, fts5_query};

/// Open the store selected by `config`
pub async fn open_store(config: &GraphConfig) -> Result<Arc<dyn GraphStore>> {
    match config.backend {
        GraphBackend::Sqlite => {
            let path = config
                .resolved_database_path()
                .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
            Ok(Arc::new(SqliteGraphStore::open(&path).await?))
        }
        GraphBackend::Neo4j => {
            let credentials = config
                .neo4j_credentials()
                .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
            Ok(Arc::new(Neo4jGraphStore::connect(&credentials).await?))
        }
    }
}
