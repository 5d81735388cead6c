//! Storage layer - SQLite
//!
//! - `database`: migrated connection pool, file-backed or in memory
//! - `migrations`: numbered schema changes for the graph tables

pub mod database;
pub mod migrations;

pub use database::Database;
pub use migrations::{MIGRATIONS, Migration, SchemaStatus, latest_version};
